//! Titan Server - HTTP host for the authorization pipeline and call cache
//!
//! Requests under `/api` pass token validation and permission evaluation in
//! the [`middleware::auth::Authorization`] middleware before reaching a
//! handler. Post reads are served through the call interceptor.

pub mod api;
pub mod error;
pub mod middleware;
pub mod model;
pub mod service;
pub mod startup;

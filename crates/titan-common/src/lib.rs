//! Titan Common - Shared error types and constants
//!
//! This crate provides the foundational types used across all Titan components:
//! - Error types and error codes
//! - Header and prefix constants shared by the auth layer and the HTTP host

pub mod error;

pub use error::{ErrorCode, TitanError};

/// Header carrying the bearer credential
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Alternate header / query parameter carrying a raw credential
pub const ACCESS_TOKEN: &str = "accessToken";

/// Scheme prefix of the `Authorization` header value
pub const BEARER_PREFIX: &str = "Bearer ";

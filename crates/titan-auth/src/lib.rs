//! Titan Auth - Authentication and authorization
//!
//! This crate provides:
//! - JWT credential validation and issuing
//! - The live permission table with atomic reload
//! - Static and dynamic access policies behind one evaluator
//! - The per-request authorization pipeline

pub mod error;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use error::{AuthenticationError, PermissionLoadError, Rejection, RejectionKind};
pub use model::*;

//! Error types and error codes for Titan
//!
//! This module defines:
//! - `TitanError`: Application-specific error enum
//! - `ErrorCode`: Structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum TitanError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("resource '{0}' not found")]
    NotFound(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const ACCESS_DENIED: ErrorCode<'static> = ErrorCode {
    code: 10001,
    message: "access denied",
};

pub const UNAUTHENTICATED: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "unauthenticated",
};

pub const POLICY_MISCONFIGURED: ErrorCode<'static> = ErrorCode {
    code: 10003,
    message: "access policy misconfigured",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const PERMISSION_RELOAD_FAILED: ErrorCode<'static> = ErrorCode {
    code: 20010,
    message: "permission table reload failed",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};

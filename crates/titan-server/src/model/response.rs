//! HTTP response types

use actix_web::{HttpResponse, HttpResponseBuilder, http::StatusCode};
use serde::{Deserialize, Serialize};

use titan_auth::Rejection;
use titan_common::error::SUCCESS;

/// Generic result wrapper for API responses
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Result<T> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

impl<T> Result<T> {
    pub fn new(code: i32, message: String, data: T) -> Self {
        Result::<T> {
            code,
            message,
            data,
        }
    }

    pub fn success(data: T) -> Result<T> {
        Result::<T> {
            code: SUCCESS.code,
            message: SUCCESS.message.to_string(),
            data,
        }
    }

    pub fn http_success(data: impl Serialize) -> HttpResponse {
        HttpResponse::Ok().json(Result::success(data))
    }

    pub fn http_response(
        status: u16,
        code: i32,
        message: String,
        data: impl Serialize,
    ) -> HttpResponse {
        HttpResponseBuilder::new(StatusCode::from_u16(status).unwrap_or_default())
            .json(Result::new(code, message, data))
    }
}

/// Body of 401/403 responses produced by the authorization middleware
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResult {
    pub timestamp: String,
    pub status: u16,
    pub code: i32,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl ErrorResult {
    pub fn from_rejection(rejection: &Rejection, path: &str) -> Self {
        ErrorResult {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: rejection.status_code(),
            code: rejection.error_code().code,
            message: rejection.to_string(),
            path: path.to_string(),
            redirect: rejection.redirect().map(str::to_string),
        }
    }

    pub fn http_response(rejection: &Rejection, path: &str) -> HttpResponse {
        let body = ErrorResult::from_rejection(rejection, path);
        HttpResponseBuilder::new(
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::FORBIDDEN),
        )
        .json(body)
    }
}

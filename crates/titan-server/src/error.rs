//! Error handling for HTTP handlers

use std::fmt::{Display, Formatter};

use actix_web::HttpResponse;

pub use titan_common::error::{
    PARAMETER_VALIDATE_ERROR, PERMISSION_RELOAD_FAILED, RESOURCE_NOT_FOUND, SERVER_ERROR,
};
pub use titan_common::{ErrorCode, TitanError};

use titan_auth::PermissionLoadError;

use crate::model::response as common;

// Local wrapper so actix-web's ResponseError can be implemented
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl From<TitanError> for AppError {
    fn from(value: TitanError) -> Self {
        AppError {
            inner: anyhow::Error::new(value),
        }
    }
}

impl From<PermissionLoadError> for AppError {
    fn from(value: PermissionLoadError) -> Self {
        AppError {
            inner: anyhow::Error::new(value),
        }
    }
}

impl AppError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl actix_web::error::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        if let Some(e) = self.downcast_ref::<PermissionLoadError>() {
            return common::Result::<String>::http_response(
                500,
                PERMISSION_RELOAD_FAILED.code,
                e.to_string(),
                String::new(),
            );
        }

        match self.downcast_ref::<TitanError>() {
            Some(TitanError::IllegalArgument(message)) => common::Result::<String>::http_response(
                400,
                PARAMETER_VALIDATE_ERROR.code,
                message.to_string(),
                String::new(),
            ),
            Some(TitanError::NotFound(message)) => common::Result::<String>::http_response(
                404,
                RESOURCE_NOT_FOUND.code,
                format!("resource '{}' not found", message),
                String::new(),
            ),
            Some(TitanError::ConfigError(message)) | Some(TitanError::InternalError(message)) => {
                common::Result::<String>::http_response(
                    500,
                    SERVER_ERROR.code,
                    message.to_string(),
                    String::new(),
                )
            }
            None => common::Result::<String>::http_response(
                500,
                SERVER_ERROR.code,
                self.inner.to_string(),
                String::new(),
            ),
        }
    }
}

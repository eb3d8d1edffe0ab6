//! Rejection taxonomy for the authorization pipeline

use std::path::PathBuf;

use titan_common::error::{ACCESS_DENIED, ErrorCode, POLICY_MISCONFIGURED, UNAUTHENTICATED};

/// Why a credential failed validation. Every variant means the caller is
/// unauthenticated.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("no credential provided")]
    MissingCredential,

    #[error("credential is malformed")]
    MalformedCredential,

    #[error("credential signature is invalid")]
    SignatureInvalid,

    #[error("credential issuer mismatch")]
    IssuerMismatch,

    #[error("credential audience mismatch")]
    AudienceMismatch,

    #[error("credential expired")]
    Expired,
}

impl AuthenticationError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationError::MissingCredential => "missing_credential",
            AuthenticationError::MalformedCredential => "malformed_credential",
            AuthenticationError::SignatureInvalid => "signature_invalid",
            AuthenticationError::IssuerMismatch => "issuer_mismatch",
            AuthenticationError::AudienceMismatch => "audience_mismatch",
            AuthenticationError::Expired => "expired",
        }
    }
}

/// Coarse outcome class the boundary layer maps to a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Unauthenticated,
    Forbidden,
}

/// Terminal rejection of a request by the authorization pipeline
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthenticationError),

    #[error("forbidden: insufficient role for '{path}'")]
    Forbidden { path: String, redirect: String },

    #[error("policy misconfigured for '{path}': {reason}")]
    PolicyMisconfigured {
        path: String,
        redirect: String,
        reason: String,
    },
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::Unauthenticated(_) => RejectionKind::Unauthenticated,
            Rejection::Forbidden { .. } | Rejection::PolicyMisconfigured { .. } => {
                RejectionKind::Forbidden
            }
        }
    }

    /// HTTP status the boundary should report: 401 or 403
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            RejectionKind::Unauthenticated => 401,
            RejectionKind::Forbidden => 403,
        }
    }

    /// Where a rejected caller would be sent, if the rejection carries it
    pub fn redirect(&self) -> Option<&str> {
        match self {
            Rejection::Unauthenticated(_) => None,
            Rejection::Forbidden { redirect, .. }
            | Rejection::PolicyMisconfigured { redirect, .. } => Some(redirect),
        }
    }

    /// API error code reported in the response body
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            Rejection::Unauthenticated(_) => UNAUTHENTICATED,
            Rejection::Forbidden { .. } => ACCESS_DENIED,
            Rejection::PolicyMisconfigured { .. } => POLICY_MISCONFIGURED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Unauthenticated(e) => e.as_str(),
            Rejection::Forbidden { .. } => "forbidden",
            Rejection::PolicyMisconfigured { .. } => "policy_misconfigured",
        }
    }
}

/// Failure to load a permission table from its source
#[derive(thiserror::Error, Debug)]
pub enum PermissionLoadError {
    #[error("failed to read permission source '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse permission source '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("permission source unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_errors_are_unauthenticated() {
        for err in [
            AuthenticationError::MissingCredential,
            AuthenticationError::MalformedCredential,
            AuthenticationError::SignatureInvalid,
            AuthenticationError::IssuerMismatch,
            AuthenticationError::AudienceMismatch,
            AuthenticationError::Expired,
        ] {
            let rejection = Rejection::from(err);
            assert_eq!(rejection.kind(), RejectionKind::Unauthenticated);
            assert_eq!(rejection.status_code(), 401);
            assert!(rejection.redirect().is_none());
        }
    }

    #[test]
    fn test_forbidden_and_misconfigured_are_403() {
        let forbidden = Rejection::Forbidden {
            path: "/api/users".to_string(),
            redirect: "/api/denied".to_string(),
        };
        assert_eq!(forbidden.status_code(), 403);
        assert_eq!(forbidden.redirect(), Some("/api/denied"));
        assert_eq!(forbidden.as_str(), "forbidden");
        assert_eq!(forbidden.error_code().code, 10001);

        let misconfigured = Rejection::PolicyMisconfigured {
            path: "/api/users".to_string(),
            redirect: "/api/denied".to_string(),
            reason: "blank role".to_string(),
        };
        assert_eq!(misconfigured.kind(), RejectionKind::Forbidden);
        assert_eq!(misconfigured.as_str(), "policy_misconfigured");
        assert_eq!(misconfigured.error_code().code, 10003);
    }

    #[test]
    fn test_rejection_display() {
        let r = Rejection::from(AuthenticationError::Expired);
        assert_eq!(r.to_string(), "unauthenticated: credential expired");
        assert_eq!(r.as_str(), "expired");
    }
}

//! Per-request authorization pipeline
//!
//! `Start -> TokenValidated -> PermissionEvaluated -> Dispatched`, with
//! `Rejected` reachable from the first two states. [`AuthorizationPipeline::authorize`]
//! walks the states up to `PermissionEvaluated` and hands out an
//! [`AuthorizedRequest`]; consuming it through [`AuthorizedRequest::dispatch`]
//! is the `Dispatched` transition. There is no other way to obtain one.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Rejection;
use crate::model::{AuthContext, Claims};
use crate::service::evaluator::Evaluator;
use crate::service::policy::RoutePolicies;
use crate::service::token::TokenValidator;

const DISPATCHED: &str = "dispatched";

/// Request lifecycle states before dispatch
#[derive(Debug)]
pub enum RequestState {
    Start,
    TokenValidated(Claims),
    PermissionEvaluated(Claims),
    Rejected(Rejection),
}

impl RequestState {
    pub fn name(&self) -> &'static str {
        match self {
            RequestState::Start => "start",
            RequestState::TokenValidated(_) => "token_validated",
            RequestState::PermissionEvaluated(_) => "permission_evaluated",
            RequestState::Rejected(_) => "rejected",
        }
    }
}

/// Proof that a request passed validation and evaluation
#[derive(Debug)]
pub struct AuthorizedRequest {
    claims: Claims,
    path: String,
}

impl AuthorizedRequest {
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hand the request to the service layer
    pub fn dispatch<F, R>(self, f: F) -> R
    where
        F: FnOnce(AuthContext) -> R,
    {
        debug!(
            path = %self.path,
            subject = %self.claims.subject,
            state = DISPATCHED,
            "Dispatching request"
        );
        f(AuthContext {
            claims: self.claims,
        })
    }
}

pub struct AuthorizationPipeline {
    validator: TokenValidator,
    evaluator: Arc<dyn Evaluator>,
    routes: RoutePolicies,
}

impl AuthorizationPipeline {
    pub fn new(
        validator: TokenValidator,
        evaluator: Arc<dyn Evaluator>,
        routes: RoutePolicies,
    ) -> Self {
        Self {
            validator,
            evaluator,
            routes,
        }
    }

    pub fn routes(&self) -> &RoutePolicies {
        &self.routes
    }

    pub fn authorize(
        &self,
        credential: Option<&str>,
        path: &str,
    ) -> Result<AuthorizedRequest, Rejection> {
        let mut state = RequestState::Start;

        loop {
            debug!(path = %path, state = state.name(), "Authorization step");
            state = match state {
                RequestState::Start => match self.validator.validate(credential) {
                    Ok(claims) => RequestState::TokenValidated(claims),
                    Err(e) => RequestState::Rejected(e.into()),
                },
                RequestState::TokenValidated(claims) => {
                    let route_policy = self.routes.policy_for(path);
                    match self.evaluator.evaluate(&claims, path, route_policy) {
                        Ok(()) => RequestState::PermissionEvaluated(claims),
                        Err(rejection) => RequestState::Rejected(rejection),
                    }
                }
                RequestState::PermissionEvaluated(claims) => {
                    return Ok(AuthorizedRequest {
                        claims,
                        path: path.to_string(),
                    });
                }
                RequestState::Rejected(rejection) => {
                    info!(
                        path = %path,
                        kind = rejection.as_str(),
                        status = rejection.status_code(),
                        "Request rejected"
                    );
                    return Err(rejection);
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::AuthenticationError;
    use crate::model::{PermissionEntry, UnmappedPolicy};
    use crate::service::evaluator::PermissionEvaluator;
    use crate::service::permission::PermissionStore;
    use crate::service::policy::PolicyRegistry;
    use crate::service::token::TokenIssuer;

    const SECRET: &[u8] = b"pipeline-test-signing-secret";

    /// Counts evaluations so tests can prove the evaluator never ran
    struct CountingEvaluator {
        inner: PermissionEvaluator,
        calls: AtomicUsize,
    }

    impl Evaluator for CountingEvaluator {
        fn evaluate(
            &self,
            claims: &Claims,
            resource_path: &str,
            route_policy: Option<&str>,
        ) -> Result<(), Rejection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.evaluate(claims, resource_path, route_policy)
        }
    }

    fn pipeline() -> (AuthorizationPipeline, Arc<CountingEvaluator>) {
        let store = Arc::new(PermissionStore::with_entries(
            &[PermissionEntry::new("/api/users", "Admin")],
            true,
        ));
        let evaluator = Arc::new(CountingEvaluator {
            inner: PermissionEvaluator::new(
                store,
                PolicyRegistry::with_defaults(),
                UnmappedPolicy::Deny,
                "/api/denied",
            ),
            calls: AtomicUsize::new(0),
        });
        let validator = TokenValidator::new(SECRET, "titan", "blog", "role", Duration::ZERO);
        let routes = RoutePolicies::new().route("/api/stats", "SystemOrAdmin");
        (
            AuthorizationPipeline::new(validator, evaluator.clone(), routes),
            evaluator,
        )
    }

    fn token(secret: &[u8], roles: &[&str]) -> String {
        TokenIssuer::new(secret, "titan", "blog", "role", Duration::from_secs(50))
            .issue("alice", roles)
            .unwrap()
    }

    #[test]
    fn test_authorized_request_dispatches() {
        let (pipeline, _) = pipeline();
        let t = token(SECRET, &["Admin"]);

        let authorized = pipeline.authorize(Some(&t), "/api/users").unwrap();
        assert_eq!(authorized.path(), "/api/users");
        let subject = authorized.dispatch(|ctx| ctx.username().to_string());
        assert_eq!(subject, "alice");
    }

    #[test]
    fn test_wrong_key_rejected_before_evaluation() {
        let (pipeline, evaluator) = pipeline();
        let t = token(b"not-the-configured-secret", &["Admin"]);

        let rejection = pipeline.authorize(Some(&t), "/api/users").unwrap_err();
        assert_eq!(
            rejection,
            Rejection::Unauthenticated(AuthenticationError::SignatureInvalid)
        );
        assert_eq!(rejection.status_code(), 401);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_credential_rejected() {
        let (pipeline, evaluator) = pipeline();
        let rejection = pipeline.authorize(None, "/api/users").unwrap_err();
        assert_eq!(
            rejection,
            Rejection::Unauthenticated(AuthenticationError::MissingCredential)
        );
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_insufficient_role_is_forbidden() {
        let (pipeline, evaluator) = pipeline();
        let t = token(SECRET, &["Client"]);

        let rejection = pipeline.authorize(Some(&t), "/api/users").unwrap_err();
        assert!(matches!(rejection, Rejection::Forbidden { .. }));
        assert_eq!(rejection.status_code(), 403);
        assert_eq!(rejection.redirect(), Some("/api/denied"));
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_route_policy_is_resolved() {
        let (pipeline, _) = pipeline();
        let system = token(SECRET, &["System"]);
        let client = token(SECRET, &["Client"]);

        assert!(pipeline.authorize(Some(&system), "/api/stats").is_ok());
        assert!(pipeline.authorize(Some(&client), "/api/stats").is_err());
    }
}

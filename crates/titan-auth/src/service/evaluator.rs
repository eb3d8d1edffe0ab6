//! Permission evaluation
//!
//! Resolves the policy that governs a path and checks the caller's roles
//! against it:
//! 1. a path registered in the permission table is decided by the table
//! 2. otherwise the route's static named policy, if it has one
//! 3. otherwise the unmapped-resource policy

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Rejection;
use crate::model::{Claims, PermissionRequirement, UnmappedPolicy};
use crate::service::permission::{PathPolicy, PermissionStore, PermissionTable};
use crate::service::policy::{AccessPolicy, PolicyRegistry};

/// Decides whether validated claims may access a resource
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        claims: &Claims,
        resource_path: &str,
        route_policy: Option<&str>,
    ) -> Result<(), Rejection>;
}

pub struct PermissionEvaluator {
    permissions: Arc<PermissionStore>,
    policies: PolicyRegistry,
    unmapped_policy: UnmappedPolicy,
    denied_redirect_path: String,
}

impl PermissionEvaluator {
    pub fn new(
        permissions: Arc<PermissionStore>,
        policies: PolicyRegistry,
        unmapped_policy: UnmappedPolicy,
        denied_redirect_path: impl Into<String>,
    ) -> Self {
        Self {
            permissions,
            policies,
            unmapped_policy,
            denied_redirect_path: denied_redirect_path.into(),
        }
    }

    pub fn from_requirement(requirement: &PermissionRequirement, policies: PolicyRegistry) -> Self {
        Self::new(
            requirement.permissions.clone(),
            policies,
            requirement.unmapped_policy,
            requirement.denied_redirect_path.clone(),
        )
    }

    pub fn denied_redirect_path(&self) -> &str {
        &self.denied_redirect_path
    }

    fn forbidden(&self, path: &str) -> Rejection {
        Rejection::Forbidden {
            path: path.to_string(),
            redirect: self.denied_redirect_path.clone(),
        }
    }

    fn misconfigured(&self, path: &str, reason: impl Into<String>) -> Rejection {
        let reason = reason.into();
        warn!(path = %path, "Denying request on misconfigured access policy: {}", reason);
        Rejection::PolicyMisconfigured {
            path: path.to_string(),
            redirect: self.denied_redirect_path.clone(),
            reason,
        }
    }

    fn check(
        &self,
        table: &PermissionTable,
        policy: &AccessPolicy,
        claims: &Claims,
        path: &str,
    ) -> Result<(), Rejection> {
        match policy {
            AccessPolicy::DynamicTableLookup => match table.lookup(path) {
                PathPolicy::Roles(accepted) if claims.has_any_role(accepted) => Ok(()),
                PathPolicy::Roles(_) => Err(self.forbidden(path)),
                PathPolicy::Misconfigured(reason) => Err(self.misconfigured(path, reason)),
                PathPolicy::Unmapped => self.check_unmapped(path),
            },
            AccessPolicy::StaticRoleSet(accepted) if accepted.is_empty() => {
                Err(self.misconfigured(path, "static policy names no roles"))
            }
            AccessPolicy::StaticRoleSet(accepted) if claims.has_any_role(accepted) => Ok(()),
            AccessPolicy::StaticRoleSet(_) => Err(self.forbidden(path)),
        }
    }

    fn check_unmapped(&self, path: &str) -> Result<(), Rejection> {
        match self.unmapped_policy {
            UnmappedPolicy::Deny => {
                debug!(path = %path, "Path not in permission table, denying");
                Err(self.forbidden(path))
            }
            UnmappedPolicy::AllowAuthenticated => Ok(()),
        }
    }
}

impl Evaluator for PermissionEvaluator {
    fn evaluate(
        &self,
        claims: &Claims,
        resource_path: &str,
        route_policy: Option<&str>,
    ) -> Result<(), Rejection> {
        // One snapshot per decision so a concurrent reload cannot split it
        let table = self.permissions.snapshot();
        if table.is_registered(resource_path) {
            return self.check(&table, &AccessPolicy::DynamicTableLookup, claims, resource_path);
        }

        match route_policy {
            Some(name) => match self.policies.get(name) {
                Some(policy) => self.check(&table, policy, claims, resource_path),
                None => Err(self.misconfigured(
                    resource_path,
                    format!("unknown policy '{}'", name),
                )),
            },
            None => self.check_unmapped(resource_path),
        }
    }
}

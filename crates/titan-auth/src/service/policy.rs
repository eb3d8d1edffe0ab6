//! Access policies and route bindings
//!
//! A route either opts into a named static role policy or defers to the
//! dynamic permission table. Both kinds are variants of [`AccessPolicy`].

use std::collections::{BTreeSet, HashMap};

use crate::model::{
    POLICY_ADMIN, POLICY_CLIENT, POLICY_PERMISSION, POLICY_SYSTEM_OR_ADMIN, ROLE_ADMIN,
    ROLE_CLIENT, ROLE_SYSTEM,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Consult the live permission table for the request path
    DynamicTableLookup,
    /// Caller must hold at least one of these roles
    StaticRoleSet(BTreeSet<String>),
}

impl AccessPolicy {
    pub fn require_role(role: impl Into<String>) -> Self {
        AccessPolicy::StaticRoleSet(BTreeSet::from([role.into()]))
    }

    pub fn require_any_role<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AccessPolicy::StaticRoleSet(roles.into_iter().map(Into::into).collect())
    }
}

/// Named policies routes can refer to
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, AccessPolicy>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Client`, `Admin`, `SystemOrAdmin` and `Permission`
    pub fn with_defaults() -> Self {
        Self::new()
            .with_policy(POLICY_CLIENT, AccessPolicy::require_role(ROLE_CLIENT))
            .with_policy(POLICY_ADMIN, AccessPolicy::require_role(ROLE_ADMIN))
            .with_policy(
                POLICY_SYSTEM_OR_ADMIN,
                AccessPolicy::require_any_role([ROLE_ADMIN, ROLE_SYSTEM]),
            )
            .with_policy(POLICY_PERMISSION, AccessPolicy::DynamicTableLookup)
    }

    pub fn with_policy(mut self, name: impl Into<String>, policy: AccessPolicy) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AccessPolicy> {
        self.policies.get(name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Binds request paths to policy names. Patterns ending in `/*` match every
/// path below the prefix; exact patterns win over prefixes.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicies {
    exact: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
}

impl RoutePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: impl Into<String>, policy: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let policy = policy.into();
        match pattern.strip_suffix("/*") {
            Some(base) => {
                self.prefixes.push((format!("{}/", base), policy));
                self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
            None => {
                self.exact.insert(pattern, policy);
            }
        }
        self
    }

    pub fn policy_for(&self, path: &str) -> Option<&str> {
        self.exact.get(path).map(String::as_str).or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                .map(|(_, policy)| policy.as_str())
        })
    }
}

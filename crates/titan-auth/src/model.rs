//! Authentication and authorization models
//!
//! This file defines the claims extracted from credentials, permission table
//! entries and the permission requirement bundle built at startup.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::service::permission::PermissionStore;

// Auth configuration keys
pub const TITAN_AUTH_ISSUER: &str = "titan.auth.issuer";
pub const TITAN_AUTH_AUDIENCE: &str = "titan.auth.audience";
pub const TITAN_AUTH_SECRET: &str = "titan.auth.secret";
pub const TITAN_AUTH_EXPIRATION_SECONDS: &str = "titan.auth.expiration.seconds";
pub const TITAN_AUTH_CLOCK_SKEW_SECONDS: &str = "titan.auth.clock.skew.seconds";
pub const TITAN_AUTH_ROLE_CLAIM: &str = "titan.auth.role.claim";
pub const TITAN_AUTH_DENIED_PATH: &str = "titan.auth.denied.path";
pub const TITAN_AUTH_UNMAPPED_POLICY: &str = "titan.auth.unmapped.policy";
pub const TITAN_AUTH_PATH_CASE_SENSITIVE: &str = "titan.auth.path.case.sensitive";
pub const TITAN_AUTH_PERMISSION_SOURCE: &str = "titan.auth.permission.source";
pub const TITAN_AUTH_PERMISSION_RELOAD_INTERVAL_MS: &str =
    "titan.auth.permission.reload.interval.ms";

pub const DEFAULT_ROLE_CLAIM: &str = "role";
pub const DEFAULT_DENIED_PATH: &str = "/api/denied";
pub const DEFAULT_EXPIRATION_SECONDS: u64 = 50;

// Named policies
pub const POLICY_CLIENT: &str = "Client";
pub const POLICY_ADMIN: &str = "Admin";
pub const POLICY_SYSTEM_OR_ADMIN: &str = "SystemOrAdmin";
pub const POLICY_PERMISSION: &str = "Permission";

pub const ROLE_CLIENT: &str = "Client";
pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_SYSTEM: &str = "System";

/// Identity facts extracted from a validated credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub subject: String,
    /// Distinct roles in the order the credential listed them
    pub roles: Vec<String>,
    pub issuer: String,
    pub audience: Vec<String>,
    pub issued_at: Option<i64>,
    pub expires_at: i64,
    /// Every claim as a (type, value) pair, arrays flattened
    pub raw: Vec<(String, String)>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// True when any held role is in `accepted`
    pub fn has_any_role(&self, accepted: &BTreeSet<String>) -> bool {
        self.roles.iter().any(|r| accepted.contains(r))
    }

    pub fn claim_values<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.raw
            .iter()
            .filter(move |(t, _)| t == claim_type)
            .map(|(_, v)| v.as_str())
    }
}

/// One row of the permission table: a path and a role that may access it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    #[serde(alias = "url", alias = "path")]
    pub resource_path: String,
    #[serde(alias = "role")]
    pub required_role: String,
}

impl PermissionEntry {
    pub fn new(resource_path: impl Into<String>, required_role: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            required_role: required_role.into(),
        }
    }
}

/// What to do with a path that the permission table does not mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmappedPolicy {
    #[default]
    Deny,
    /// Any caller holding a valid credential is allowed
    AllowAuthenticated,
}

impl UnmappedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmappedPolicy::Deny => "deny",
            UnmappedPolicy::AllowAuthenticated => "allow-authenticated",
        }
    }
}

impl fmt::Display for UnmappedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UnmappedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deny" => Ok(UnmappedPolicy::Deny),
            "allow-authenticated" | "allow_authenticated" => Ok(UnmappedPolicy::AllowAuthenticated),
            _ => Err(format!("Invalid unmapped policy: {}", s)),
        }
    }
}

/// Configuration bundle driving authorization decisions for the process.
///
/// Everything except the permission store is fixed after startup; the store
/// is shared and its table may be swapped by reloads.
#[derive(Clone)]
pub struct PermissionRequirement {
    pub denied_redirect_path: String,
    pub permissions: Arc<PermissionStore>,
    pub role_claim_type: String,
    pub issuer: String,
    pub audience: String,
    pub signing_secret: Vec<u8>,
    pub expiration: Duration,
    pub clock_skew: Duration,
    pub unmapped_policy: UnmappedPolicy,
}

impl PermissionRequirement {
    pub fn new(
        denied_redirect_path: impl Into<String>,
        permissions: Arc<PermissionStore>,
        role_claim_type: impl Into<String>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        signing_secret: impl Into<Vec<u8>>,
        expiration: Duration,
    ) -> Self {
        Self {
            denied_redirect_path: denied_redirect_path.into(),
            permissions,
            role_claim_type: role_claim_type.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            signing_secret: signing_secret.into(),
            expiration,
            clock_skew: Duration::ZERO,
            unmapped_policy: UnmappedPolicy::Deny,
        }
    }

    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    pub fn with_unmapped_policy(mut self, policy: UnmappedPolicy) -> Self {
        self.unmapped_policy = policy;
        self
    }
}

impl fmt::Debug for PermissionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionRequirement")
            .field("denied_redirect_path", &self.denied_redirect_path)
            .field("role_claim_type", &self.role_claim_type)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("signing_secret", &"<redacted>")
            .field("expiration", &self.expiration)
            .field("clock_skew", &self.clock_skew)
            .field("unmapped_policy", &self.unmapped_policy)
            .finish()
    }
}

/// Auth context passed through request extensions once a request is authorized
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
}

impl AuthContext {
    pub fn username(&self) -> &str {
        &self.claims.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(roles: &[&str]) -> Claims {
        Claims {
            subject: "alice".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            issuer: "titan".to_string(),
            audience: vec!["blog".to_string()],
            issued_at: None,
            expires_at: 0,
            raw: roles
                .iter()
                .map(|r| ("role".to_string(), r.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_auth_constants() {
        assert_eq!(DEFAULT_ROLE_CLAIM, "role");
        assert_eq!(DEFAULT_DENIED_PATH, "/api/denied");
        assert_eq!(DEFAULT_EXPIRATION_SECONDS, 50);
    }

    #[test]
    fn test_claims_role_checks() {
        let c = claims(&["Client", "Admin"]);
        assert!(c.has_role("Admin"));
        assert!(!c.has_role("admin"));

        let accepted: BTreeSet<String> = ["System".to_string(), "Admin".to_string()].into();
        assert!(c.has_any_role(&accepted));

        let other: BTreeSet<String> = ["System".to_string()].into();
        assert!(!c.has_any_role(&other));
    }

    #[test]
    fn test_claim_values() {
        let c = claims(&["Client", "Admin"]);
        let values: Vec<&str> = c.claim_values("role").collect();
        assert_eq!(values, vec!["Client", "Admin"]);
        assert_eq!(c.claim_values("sub").count(), 0);
    }

    #[test]
    fn test_permission_entry_aliases() {
        let entry: PermissionEntry =
            serde_json::from_str(r#"{"url": "/api/values", "role": "Admin"}"#).unwrap();
        assert_eq!(entry, PermissionEntry::new("/api/values", "Admin"));

        let entry: PermissionEntry =
            serde_json::from_str(r#"{"resourcePath": "/api/values", "requiredRole": "System"}"#)
                .unwrap();
        assert_eq!(entry.required_role, "System");
    }

    #[test]
    fn test_unmapped_policy_from_str() {
        assert_eq!("deny".parse::<UnmappedPolicy>().unwrap(), UnmappedPolicy::Deny);
        assert_eq!(
            "allow-authenticated".parse::<UnmappedPolicy>().unwrap(),
            UnmappedPolicy::AllowAuthenticated
        );
        assert!("allow".parse::<UnmappedPolicy>().is_err());
        assert_eq!(UnmappedPolicy::default(), UnmappedPolicy::Deny);
    }

    #[test]
    fn test_requirement_debug_redacts_secret() {
        let requirement = PermissionRequirement::new(
            DEFAULT_DENIED_PATH,
            Arc::new(PermissionStore::new(true)),
            DEFAULT_ROLE_CLAIM,
            "titan",
            "blog",
            b"super-secret-signing-material".to_vec(),
            Duration::from_secs(DEFAULT_EXPIRATION_SECONDS),
        );
        let printed = format!("{:?}", requirement);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("super-secret"));
        assert_eq!(requirement.clock_skew, Duration::ZERO);
        assert_eq!(requirement.unmapped_policy, UnmappedPolicy::Deny);
    }
}

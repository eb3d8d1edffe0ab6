//! JWT credential validation and issuing

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::{Map, Value};

use crate::error::AuthenticationError;
use crate::model::{Claims, PermissionRequirement};

type RawClaims = Map<String, Value>;

/// Verifies bearer credentials against the process signing material.
///
/// Validation is stateless and performs no I/O; a validator can be shared
/// freely between request tasks.
#[derive(Clone)]
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    expiry_probe: Validation,
    role_claim_type: String,
}

impl TokenValidator {
    pub fn new(
        secret: &[u8],
        issuer: &str,
        audience: &str,
        role_claim_type: &str,
        clock_skew: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = clock_skew.as_secs();
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        // Expiry is reported ahead of any other failure, including a bad
        // signature, so the probe only looks at `exp`.
        let mut expiry_probe = Validation::new(Algorithm::HS256);
        expiry_probe.insecure_disable_signature_validation();
        expiry_probe.validate_aud = false;
        expiry_probe.leeway = clock_skew.as_secs();
        expiry_probe.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            expiry_probe,
            role_claim_type: role_claim_type.to_string(),
        }
    }

    pub fn from_requirement(requirement: &PermissionRequirement) -> Self {
        Self::new(
            &requirement.signing_secret,
            &requirement.issuer,
            &requirement.audience,
            &requirement.role_claim_type,
            requirement.clock_skew,
        )
    }

    /// Validate a raw credential and extract its claims
    pub fn validate(&self, credential: Option<&str>) -> Result<Claims, AuthenticationError> {
        let token = match credential.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(AuthenticationError::MissingCredential),
        };

        if self.is_expired(token) {
            return Err(AuthenticationError::Expired);
        }

        let data = decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| map_jwt_error(e.kind()))?;

        self.extract_claims(data.claims)
    }

    fn is_expired(&self, token: &str) -> bool {
        match decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &self.expiry_probe) {
            Err(e) => matches!(e.kind(), ErrorKind::ExpiredSignature),
            Ok(_) => false,
        }
    }

    fn extract_claims(&self, raw: RawClaims) -> Result<Claims, AuthenticationError> {
        let subject = raw
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(AuthenticationError::MalformedCredential)?
            .to_string();
        let expires_at = raw
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(AuthenticationError::MalformedCredential)?;
        let issuer = raw
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let issued_at = raw.get("iat").and_then(Value::as_i64);
        let audience = raw.get("aud").map(string_values).unwrap_or_default();

        let mut roles: Vec<String> = Vec::new();
        for role in raw.get(&self.role_claim_type).map(string_values).unwrap_or_default() {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }

        let raw = raw
            .iter()
            .flat_map(|(claim_type, value)| {
                string_values(value)
                    .into_iter()
                    .map(move |v| (claim_type.clone(), v))
            })
            .collect();

        Ok(Claims {
            subject,
            roles,
            issuer,
            audience,
            issued_at,
            expires_at,
            raw,
        })
    }
}

/// Flatten a claim value into its string forms; arrays yield one entry per element
fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(string_values).collect(),
        other => vec![other.to_string()],
    }
}

fn map_jwt_error(kind: &ErrorKind) -> AuthenticationError {
    match kind {
        ErrorKind::ExpiredSignature => AuthenticationError::Expired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
            AuthenticationError::SignatureInvalid
        }
        ErrorKind::InvalidIssuer => AuthenticationError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthenticationError::AudienceMismatch,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "iss" => AuthenticationError::IssuerMismatch,
            "aud" => AuthenticationError::AudienceMismatch,
            _ => AuthenticationError::MalformedCredential,
        },
        _ => AuthenticationError::MalformedCredential,
    }
}

/// Signs credentials with the same material the validator checks.
///
/// Issuing endpoints are not part of this server; the issuer backs tests,
/// benches and local tooling.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    issuer: String,
    audience: String,
    role_claim_type: String,
    expiration: Duration,
}

impl TokenIssuer {
    pub fn new(
        secret: &[u8],
        issuer: &str,
        audience: &str,
        role_claim_type: &str,
        expiration: Duration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            role_claim_type: role_claim_type.to_string(),
            expiration,
        }
    }

    pub fn from_requirement(requirement: &PermissionRequirement) -> Self {
        Self::new(
            &requirement.signing_secret,
            &requirement.issuer,
            &requirement.audience,
            &requirement.role_claim_type,
            requirement.expiration,
        )
    }

    /// Issue a credential valid from now for the configured expiration window
    pub fn issue(&self, subject: &str, roles: &[&str]) -> jsonwebtoken::errors::Result<String> {
        self.issue_at(subject, roles, Utc::now())
    }

    /// Issue a credential as if it had been signed at `issued_at`
    pub fn issue_at(
        &self,
        subject: &str,
        roles: &[&str],
        issued_at: DateTime<Utc>,
    ) -> jsonwebtoken::errors::Result<String> {
        let window = chrono::Duration::from_std(self.expiration)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let exp = issued_at
            .checked_add_signed(window)
            .unwrap_or(issued_at)
            .timestamp();

        let mut payload = Map::new();
        payload.insert("sub".to_string(), Value::from(subject));
        payload.insert("jti".to_string(), Value::from(uuid::Uuid::new_v4().to_string()));
        payload.insert("iss".to_string(), Value::from(self.issuer.as_str()));
        payload.insert("aud".to_string(), Value::from(self.audience.as_str()));
        payload.insert("iat".to_string(), Value::from(issued_at.timestamp()));
        payload.insert("exp".to_string(), Value::from(exp));
        payload.insert(
            self.role_claim_type.clone(),
            Value::Array(roles.iter().map(|r| Value::from(*r)).collect()),
        );

        encode(&Header::new(Algorithm::HS256), &payload, &self.encoding_key)
    }
}

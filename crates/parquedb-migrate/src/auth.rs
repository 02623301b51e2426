//! Bearer-token gate for the control plane
//!
//! The JWKS-backed verifier is wired in by the embedding service; this crate
//! only defines the interface it must satisfy. A deployment without JWKS
//! configuration gets [`DenyAllVerifier`], which makes every control call
//! return the 401 contract.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

/// Verified token claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
}

/// Control-plane errors carry an HTTP-shaped status for the outer router.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ControlError {
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::JobNotFound(_) => 404,
            Self::InvalidRequest(_) => 400,
        }
    }

    /// The `{"error": ...}` body the router serializes.
    pub fn to_body(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Body {
            error: String,
        }
        serde_json::to_value(Body {
            error: self.to_string(),
        })
        .expect("static shape")
    }
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, ControlError>;
}

/// No verification configured: everything is unauthorized.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllVerifier;

impl TokenVerifier for DenyAllVerifier {
    fn verify(&self, _token: &str) -> Result<Claims, ControlError> {
        Err(ControlError::Unauthorized)
    }
}

/// Fixed token set for embedded deployments and tests.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, token: impl Into<String>, subject: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), subject.into());
        self
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Claims, ControlError> {
        self.tokens
            .get(token)
            .map(|subject| Claims {
                subject: subject.clone(),
            })
            .ok_or(ControlError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_all_rejects_everything() {
        assert!(DenyAllVerifier.verify("any-token").is_err());
    }

    #[test]
    fn static_verifier() {
        let verifier = StaticTokenVerifier::new().allow("secret", "amy");
        assert_eq!(verifier.verify("secret").unwrap().subject, "amy");
        assert!(verifier.verify("wrong").is_err());
    }

    #[test]
    fn unauthorized_shape() {
        let err = ControlError::Unauthorized;
        assert_eq!(err.status(), 401);
        assert_eq!(err.to_body(), serde_json::json!({"error": "unauthorized"}));
    }
}

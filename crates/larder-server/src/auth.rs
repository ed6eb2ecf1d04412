use std::collections::HashMap;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use larder_protocol::Claims;
use liblarder::error::LarderError;

/// Verifies an opaque bearer credential. Issuance and refresh belong to the
/// external auth service; this core only checks presence and expiry.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, LarderError>;
}

/// Static bearer table for development and tests, loaded from config.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Claims>,
}

impl StaticTokenVerifier {
    /// Build from a bearer -> subject table. Entries created this way never
    /// expire; use [`insert`](Self::insert) for expiring credentials.
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        let tokens = tokens
            .iter()
            .map(|(token, subject)| {
                (
                    token.clone(),
                    Claims {
                        subject: subject.clone(),
                        expires_at_epoch_ms: u64::MAX,
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn insert(&mut self, token: &str, claims: Claims) {
        self.tokens.insert(token.to_string(), claims);
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Claims, LarderError> {
        let claims = self.tokens.get(token).ok_or(LarderError::Unauthorized)?;
        if claims.is_expired(epoch_ms()) {
            return Err(LarderError::TokenExpired);
        }
        Ok(claims.clone())
    }
}

/// Pull the bearer token out of an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, LarderError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(LarderError::Unauthorized)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(LarderError::Unauthorized)
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

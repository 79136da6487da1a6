use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token missing subject")]
    MissingSubject,
}

/// Identity resolved from a verified credential token.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub identity: String,
    /// Human-readable identifier shown to peers, fixed for the connection's
    /// lifetime.
    pub label: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Verifies HS256-signed login tokens. Pure lookup; results are never cached
/// or reinterpreted here.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthIdentity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }

        let label = claims
            .email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| claims.sub.clone());

        Ok(AuthIdentity {
            identity: claims.sub,
            label,
        })
    }
}

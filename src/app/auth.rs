use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::SummarizeError;
use crate::types::UserTier;
use crate::TARGET_WEB_REQUEST;

/// Claims carried by the bearer token of every authenticated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id issued by the identity provider.
    pub sub: String,
    /// Expiration time (as a timestamp).
    pub exp: usize,
    /// Billing tier vouched for by the identity provider. When absent the
    /// configured tier for `sub` applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<UserTier>,
    #[serde(default)]
    pub admin: bool,
}

impl Claims {
    pub fn new(sub: &str, valid_for: Duration) -> Self {
        let expires = chrono::Utc::now()
            + chrono::Duration::from_std(valid_for).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self {
            sub: sub.to_string(),
            exp: usize::try_from(expires.timestamp()).unwrap_or(0),
            tier: None,
            admin: false,
        }
    }

    pub fn with_tier(mut self, tier: UserTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_admin(mut self) -> Self {
        self.admin = true;
        self
    }
}

/// HMAC-SHA256 signing and verification keys.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// A throwaway 256-bit key. Tokens signed with it die with the process.
    pub fn random() -> Self {
        let mut key_bytes = [0u8; 32];
        rand::rng().fill(&mut key_bytes[..]);
        Self::from_secret(&key_bytes)
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, SummarizeError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(target: TARGET_WEB_REQUEST, "JWT validation failed: {}", e);
                SummarizeError::Authentication {
                    reason: e.to_string(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let keys = JwtKeys::from_secret(b"test-secret");
        let claims = Claims::new("user-1", Duration::from_secs(600)).with_tier(UserTier::Premium);
        let token = keys.issue(&claims).unwrap();

        let verified = keys.verify(&token).unwrap();
        assert_eq!(verified.sub, "user-1");
        assert_eq!(verified.tier, Some(UserTier::Premium));
        assert!(!verified.admin);
    }

    #[test]
    fn test_foreign_and_expired_tokens_are_rejected() {
        let keys = JwtKeys::from_secret(b"test-secret");
        let other = JwtKeys::random();
        let token = other
            .issue(&Claims::new("user-1", Duration::from_secs(600)))
            .unwrap();
        assert!(matches!(
            keys.verify(&token),
            Err(SummarizeError::Authentication { .. })
        ));

        let mut expired = Claims::new("user-1", Duration::from_secs(600));
        expired.exp = 1_000;
        let token = keys.issue(&expired).unwrap();
        assert!(keys.verify(&token).is_err());
    }
}

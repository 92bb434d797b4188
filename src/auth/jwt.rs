//! JWT issue/verify.

use super::{Claims, Role};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

const DEFAULT_TOKEN_HOURS: i64 = 24;

pub struct JwtService {
    secret: String,
    token_hours: i64,
}

impl JwtService {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            token_hours: DEFAULT_TOKEN_HOURS,
        }
    }

    /// Issue a bearer token for a user.
    pub fn issue(&self, user_id: &str, email: &str, role: Role) -> Result<String> {
        let exp = Utc::now()
            .checked_add_signed(chrono::Duration::hours(self.token_hours))
            .context("token expiry overflow")?
            .timestamp() as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to sign token")
    }

    /// Validate a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;
        Ok(decoded.claims)
    }
}

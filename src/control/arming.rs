//! One-time arming tokens for live trading.
//!
//! A token is 128 bits of randomness, hex-encoded, stored with a short TTL
//! and consumed atomically. On Redis the check-and-delete runs as a single
//! Lua script so concurrent consumers see at most one success.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use redis::aio::ConnectionManager;
use redis::Script;

pub const ARMING_TOKEN_TTL_SECONDS: u64 = 30;

const TOKEN_KEY_PREFIX: &str = "quantsail:control:arming_token:";

const CHECK_AND_DELETE: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    redis.call("DEL", KEYS[1])
    return 1
else
    return 0
end
"#;

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
pub trait ArmingCache: Send + Sync {
    /// Create and store a short-lived token, returned exactly once.
    async fn create_token(&self, ttl_seconds: u64) -> Result<String>;

    /// Verify a token exists and delete it in one step. Returns true on the
    /// first (and only) successful consumption.
    async fn verify_and_consume(&self, token: &str) -> Result<bool>;
}

/// Single outstanding token held in memory, for tests and dry runs.
pub struct InMemoryArmingCache {
    token: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl InMemoryArmingCache {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }
}

impl Default for InMemoryArmingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArmingCache for InMemoryArmingCache {
    async fn create_token(&self, ttl_seconds: u64) -> Result<String> {
        let token = generate_token();
        let expires_at = Utc::now() + Duration::seconds(ttl_seconds as i64);
        *self.token.lock() = Some((token.clone(), expires_at));
        Ok(token)
    }

    async fn verify_and_consume(&self, token: &str) -> Result<bool> {
        let mut guard = self.token.lock();
        match guard.take() {
            Some((stored, expires_at)) if stored == token && Utc::now() < expires_at => Ok(true),
            Some((stored, expires_at)) if stored != token => {
                // Wrong token leaves the stored one in place.
                *guard = Some((stored, expires_at));
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

pub struct RedisArmingCache {
    manager: ConnectionManager,
    consume_script: Script,
}

impl RedisArmingCache {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            consume_script: Script::new(CHECK_AND_DELETE),
        }
    }
}

#[async_trait]
impl ArmingCache for RedisArmingCache {
    async fn create_token(&self, ttl_seconds: u64) -> Result<String> {
        let token = generate_token();
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(format!("{TOKEN_KEY_PREFIX}{token}"))
            .arg("1")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await
            .context("failed to store arming token")?;
        Ok(token)
    }

    async fn verify_and_consume(&self, token: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let consumed: i64 = self
            .consume_script
            .key(format!("{TOKEN_KEY_PREFIX}{token}"))
            .invoke_async(&mut conn)
            .await
            .context("arming token check-and-delete failed")?;
        Ok(consumed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_is_128_bit_hex() {
        let cache = InMemoryArmingCache::new();
        let token = cache.create_token(30).await.unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn consume_succeeds_once() {
        let cache = InMemoryArmingCache::new();
        let token = cache.create_token(30).await.unwrap();
        assert!(cache.verify_and_consume(&token).await.unwrap());
        assert!(!cache.verify_and_consume(&token).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_token_does_not_consume() {
        let cache = InMemoryArmingCache::new();
        let token = cache.create_token(30).await.unwrap();
        assert!(!cache.verify_and_consume("not-the-token").await.unwrap());
        // The real token is still valid.
        assert!(cache.verify_and_consume(&token).await.unwrap());
    }

    #[tokio::test]
    async fn expired_token_fails() {
        let cache = InMemoryArmingCache::new();
        let token = cache.create_token(0).await.unwrap();
        assert!(!cache.verify_and_consume(&token).await.unwrap());
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let cache = InMemoryArmingCache::new();
        let a = cache.create_token(30).await.unwrap();
        let b = cache.create_token(30).await.unwrap();
        assert_ne!(a, b);
    }
}

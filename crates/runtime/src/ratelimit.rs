//! Fixed-window rate limiting backed by Redis
//!
//! One atomic INCR+EXPIRE (via Lua) per gated request. When Redis is
//! unreachable the limiter fails open: availability wins over strictness
//! for these endpoints.

use chrono::Utc;
use redis::Script;

/// Atomic counter-with-TTL: INCR, arm the expiry on the first hit in the
/// window, and return both the count and the remaining TTL.
const RATE_LIMIT_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
  redis.call("EXPIRE", KEYS[1], ARGV[1])
end
local ttl = redis.call("TTL", KEYS[1])
return {current, ttl}
"#;

/// Who is being counted: authenticated subject or best-effort guest address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityClass {
    Auth,
    Guest,
}

impl IdentityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityClass::Auth => "auth",
            IdentityClass::Guest => "guest",
        }
    }
}

/// Build the counter key for a gated scope and identity.
pub fn bucket_key(scope: &str, class: IdentityClass, identity: &str) -> String {
    format!("ratelimit:{scope}:{}:{identity}", class.as_str())
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_epoch: i64,
    pub retry_after: i64,
}

/// Outcome of a limiter check. `Unavailable` means the caller should serve
/// the request without headers (fail open).
#[derive(Debug)]
pub enum RateLimitOutcome {
    Decided(RateLimitDecision),
    Unavailable,
}

pub async fn check(
    client: &redis::Client,
    key: &str,
    limit: i64,
    window_seconds: u64,
) -> RateLimitOutcome {
    let mut connection = match client.get_multiplexed_async_connection().await {
        Ok(connection) => connection,
        Err(error) => {
            tracing::warn!(%error, "rate limiter redis unavailable, failing open");
            return RateLimitOutcome::Unavailable;
        }
    };

    let result: Result<(i64, i64), redis::RedisError> = Script::new(RATE_LIMIT_SCRIPT)
        .key(key)
        .arg(window_seconds)
        .invoke_async(&mut connection)
        .await;

    let (current, ttl) = match result {
        Ok(values) => values,
        Err(error) => {
            tracing::warn!(%error, "rate limiter eval failed, failing open");
            return RateLimitOutcome::Unavailable;
        }
    };

    let ttl = if ttl > 0 { ttl } else { window_seconds as i64 };
    let remaining = (limit - current).max(0);

    RateLimitOutcome::Decided(RateLimitDecision {
        allowed: current <= limit,
        limit,
        remaining,
        reset_epoch: Utc::now().timestamp() + ttl,
        retry_after: ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_keys_encode_scope_and_identity() {
        assert_eq!(
            bucket_key("analyze", IdentityClass::Guest, "203.0.113.9"),
            "ratelimit:analyze:guest:203.0.113.9"
        );
        assert_eq!(
            bucket_key("chat", IdentityClass::Auth, "user-uuid"),
            "ratelimit:chat:auth:user-uuid"
        );
    }

    #[tokio::test]
    async fn unreachable_redis_fails_open() {
        let client = redis::Client::open("redis://127.0.0.1:1/0").unwrap();
        match check(&client, "ratelimit:test:guest:x", 10, 60).await {
            RateLimitOutcome::Unavailable => {}
            RateLimitOutcome::Decided(_) => panic!("expected fail-open against a dead redis"),
        }
    }
}

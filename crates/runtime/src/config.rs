//! Configuration management for the DevLens runtime
//!
//! The configuration is loaded once from environment variables, validated,
//! and then passed as an explicit handle into the API server and the
//! pipeline workers. Nothing reads the environment after startup.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment name ("development", "staging", "production")
    pub env: String,
    /// Base URL of the frontend, used for OAuth redirects, share links, and
    /// Origin validation
    pub frontend_url: String,
    /// API server configuration
    pub api: ApiConfig,
    /// Storage backends
    pub database: DatabaseConfig,
    /// GitHub provider configuration
    pub github: GithubConfig,
    /// Token signing and lifetimes
    pub auth: AuthConfig,
    /// LLM summary providers
    pub llm: LlmConfig,
    /// Rate limiting
    pub rate_limit: RateLimitConfig,
    /// Parsing stage limits
    pub parse: ParseConfig,
    /// Embedding stage limits
    pub embed: EmbedConfig,
    /// Worker retry budget and telemetry
    pub worker: WorkerConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(skip_serializing)]
    pub url: String,
    /// Redis connection URL
    #[serde(skip_serializing)]
    pub redis_url: String,
    /// Qdrant vector database URL
    pub qdrant_url: String,
    /// Qdrant collection name
    pub qdrant_collection: String,
}

/// GitHub OAuth app and REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Registered OAuth callback URL
    pub oauth_redirect_uri: String,
}

/// Token signing and lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access/share JWTs and the OAuth state signature
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    /// Access token lifetime in minutes
    pub jwt_access_ttl_minutes: i64,
    /// Refresh token lifetime in days
    pub jwt_refresh_ttl_days: i64,
    /// Default share link lifetime in days (1..=30)
    pub share_token_ttl_days: i64,
}

/// LLM summary provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip_serializing)]
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    #[serde(skip_serializing)]
    pub groq_api_key: Option<String>,
    pub groq_base_url: String,
    /// Model used for architecture summaries
    pub summary_model: String,
    /// Per-attempt completion timeout in seconds
    pub summary_timeout_seconds: u64,
    /// Provider tried first ("openrouter" or "groq")
    pub primary_provider: Option<String>,
    /// Provider tried when the primary fails
    pub fallback_provider: Option<String>,
    /// Model override for the fallback provider
    pub fallback_model: Option<String>,
}

/// Fixed-window rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub guest_per_window: i64,
    pub auth_per_window: i64,
}

/// Parsing stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Maximum number of source files accepted per repository
    pub max_files: usize,
    /// Maximum number of chunks accepted per repository
    pub max_chunks: usize,
    /// Lines per chunk window
    pub chunk_lines: usize,
    /// Overlapping lines between consecutive windows
    pub chunk_overlap_lines: usize,
    /// Bound on each git subprocess invocation
    pub clone_timeout_seconds: u64,
}

/// Embedding stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Dimension of the vector collection
    pub vector_size: usize,
    /// Chunks per upsert batch
    pub batch_size: usize,
    /// Transport-level retries per vector-store request
    pub retry_attempts: u32,
}

/// Worker retry budget and telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Retry budget before a job is dead-lettered
    pub retry_max_attempts: i32,
    /// Base delay for exponential backoff, in seconds
    pub retry_base_delay_seconds: i64,
    /// Port for the worker's Prometheus listener
    pub metrics_port: u16,
}

impl Config {
    /// Load the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            env: var_or("ENV", "development"),
            frontend_url: required("FRONTEND_URL")?,
            api: ApiConfig {
                bind_address: var_or("BIND_ADDRESS", "0.0.0.0"),
                port: parsed_or("PORT", 8000)?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                redis_url: required("REDIS_URL")?,
                qdrant_url: required("QDRANT_URL")?,
                qdrant_collection: required("QDRANT_COLLECTION")?,
            },
            github: GithubConfig {
                client_id: required("GITHUB_CLIENT_ID")?,
                client_secret: required("GITHUB_CLIENT_SECRET")?,
                oauth_redirect_uri: required("GITHUB_OAUTH_REDIRECT_URI")?,
            },
            auth: AuthConfig {
                jwt_secret: required("JWT_SECRET")?,
                jwt_access_ttl_minutes: parsed_or("JWT_ACCESS_TTL_MINUTES", 15)?,
                jwt_refresh_ttl_days: parsed_or("JWT_REFRESH_TTL_DAYS", 30)?,
                share_token_ttl_days: parsed_or("SHARE_TOKEN_TTL_DAYS", 7)?,
            },
            llm: LlmConfig {
                openrouter_api_key: optional("OPENROUTER_API_KEY"),
                openrouter_base_url: var_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
                groq_api_key: optional("GROQ_API_KEY"),
                groq_base_url: var_or("GROQ_BASE_URL", "https://api.groq.com/openai/v1"),
                summary_model: required("LLM_SUMMARY_MODEL")?,
                summary_timeout_seconds: parsed_or("LLM_SUMMARY_TIMEOUT_SECONDS", 20)?,
                primary_provider: optional("LLM_PRIMARY_PROVIDER"),
                fallback_provider: optional("LLM_FALLBACK_PROVIDER"),
                fallback_model: optional("LLM_FALLBACK_MODEL"),
            },
            rate_limit: RateLimitConfig {
                window_seconds: parsed_or("RATE_LIMIT_WINDOW_SECONDS", 60)?,
                guest_per_window: parsed_or("RATE_LIMIT_GUEST_PER_WINDOW", 10)?,
                auth_per_window: parsed_or("RATE_LIMIT_AUTH_PER_WINDOW", 60)?,
            },
            parse: ParseConfig {
                max_files: parsed_or("PARSE_MAX_FILES", 2000)?,
                max_chunks: parsed_or("PARSE_MAX_CHUNKS", 20000)?,
                chunk_lines: parsed_or("PARSE_CHUNK_LINES", 80)?,
                chunk_overlap_lines: parsed_or("PARSE_CHUNK_OVERLAP_LINES", 20)?,
                clone_timeout_seconds: parsed_or("PARSE_CLONE_TIMEOUT_SECONDS", 120)?,
            },
            embed: EmbedConfig {
                vector_size: parsed_or("EMBED_VECTOR_SIZE", 384)?,
                batch_size: parsed_or("EMBED_BATCH_SIZE", 64)?,
                retry_attempts: parsed_or("EMBED_RETRY_ATTEMPTS", 3)?,
            },
            worker: WorkerConfig {
                retry_max_attempts: parsed_or("WORKER_RETRY_MAX_ATTEMPTS", 3)?,
                retry_base_delay_seconds: parsed_or("WORKER_RETRY_BASE_DELAY_SECONDS", 30)?,
                metrics_port: parsed_or("WORKER_METRICS_PORT", 9100)?,
            },
        })
    }

    /// Cookies are marked `Secure` everywhere except local development.
    pub fn secure_cookies(&self) -> bool {
        !self.env.eq_ignore_ascii_case("development")
    }

    /// A complete development-flavored configuration for unit tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            env: "development".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            api: ApiConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/devlens".to_string(),
                redis_url: "redis://localhost:6379/0".to_string(),
                qdrant_url: "http://localhost:6333".to_string(),
                qdrant_collection: "devlens_chunks".to_string(),
            },
            github: GithubConfig {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                oauth_redirect_uri: "http://localhost:8000/api/v1/auth/callback".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "unit-test-secret".to_string(),
                jwt_access_ttl_minutes: 15,
                jwt_refresh_ttl_days: 30,
                share_token_ttl_days: 7,
            },
            llm: LlmConfig {
                openrouter_api_key: None,
                openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
                groq_api_key: None,
                groq_base_url: "https://api.groq.com/openai/v1".to_string(),
                summary_model: "test-model".to_string(),
                summary_timeout_seconds: 20,
                primary_provider: None,
                fallback_provider: None,
                fallback_model: None,
            },
            rate_limit: RateLimitConfig {
                window_seconds: 60,
                guest_per_window: 10,
                auth_per_window: 60,
            },
            parse: ParseConfig {
                max_files: 2000,
                max_chunks: 20000,
                chunk_lines: 80,
                chunk_overlap_lines: 20,
                clone_timeout_seconds: 120,
            },
            embed: EmbedConfig {
                vector_size: 384,
                batch_size: 64,
                retry_attempts: 3,
            },
            worker: WorkerConfig {
                retry_max_attempts: 3,
                retry_base_delay_seconds: 30,
                metrics_port: 9100,
            },
        }
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
        })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("could not parse {raw:?}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_or_uses_default_when_unset() {
        assert_eq!(parsed_or::<u16>("DEVLENS_TEST_UNSET_PORT", 8000).unwrap(), 8000);
    }

    #[test]
    fn parsed_or_rejects_garbage() {
        std::env::set_var("DEVLENS_TEST_BAD_PORT", "not-a-port");
        assert!(parsed_or::<u16>("DEVLENS_TEST_BAD_PORT", 8000).is_err());
        std::env::remove_var("DEVLENS_TEST_BAD_PORT");
    }

    #[test]
    fn required_rejects_blank_values() {
        std::env::set_var("DEVLENS_TEST_BLANK", "   ");
        assert!(required("DEVLENS_TEST_BLANK").is_err());
        std::env::remove_var("DEVLENS_TEST_BLANK");
    }
}

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use warden_api::auth::VerifierConfig;
use warden_store::RepositoryConfig;

/// Back-end settings, read from `WARDEN_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite file, or `:memory:` for a throwaway database.
    pub db_path: String,
    pub session_ttl: Duration,
    pub user_cache_ttl: Duration,
    pub password_cache_ttl: Duration,
    pub password_cache_capacity: usize,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("WARDEN_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: var_or("WARDEN_PORT", 8081)?,
            db_path: env::var("WARDEN_DB_PATH").unwrap_or_else(|_| "warden.db".into()),
            session_ttl: Duration::from_secs(var_or("WARDEN_SESSION_TTL_SECS", 4 * 3600)?),
            user_cache_ttl: Duration::from_secs(var_or("WARDEN_USER_CACHE_TTL_SECS", 60)?),
            password_cache_ttl: Duration::from_secs(var_or("WARDEN_PASSWORD_CACHE_TTL_SECS", 300)?),
            password_cache_capacity: var_or("WARDEN_PASSWORD_CACHE_CAPACITY", 250)?,
            sweep_interval: Duration::from_secs(var_or("WARDEN_SWEEP_INTERVAL_SECS", 60)?),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn repository(&self) -> RepositoryConfig {
        RepositoryConfig {
            user_ttl: self.user_cache_ttl,
            session_ttl: self.session_ttl,
        }
    }

    pub fn verifier(&self) -> VerifierConfig {
        VerifierConfig {
            memo_ttl: self.password_cache_ttl,
            memo_capacity: self.password_cache_capacity,
            ..VerifierConfig::default()
        }
    }
}

/// An unset variable takes the default; a set but malformed one is an error.
fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", name, value)),
        Err(_) => Ok(default),
    }
}

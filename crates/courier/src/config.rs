//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use courier_auth::KdfParams;
use courier_registry::{ParsePolicyError, RegistryConfig, SubscribePolicy};

/// A configuration value that is missing or unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything needed to start a server.
///
/// Construct with [`Default`] plus the builder setters, or read it from the
/// process environment with [`from_env`](Self::from_env).
#[derive(Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: String,

    /// SQLite database file.
    pub db_path: PathBuf,

    /// Token signing secret. Never logged.
    pub secret_key: String,

    /// How long issued tokens stay valid.
    pub token_ttl: TimeDelta,

    /// Deadline for each unary request, and for the authorize-and-backfill
    /// phase of a subscribe.
    pub request_timeout: Duration,

    pub registry: RegistryConfig,

    pub kdf: KdfParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_owned(),
            db_path: PathBuf::from("courier.db"),
            secret_key: String::new(),
            token_ttl: TimeDelta::hours(480),
            request_timeout: Duration::from_secs(5),
            registry: RegistryConfig::default(),
            kdf: KdfParams::default(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("db_path", &self.db_path)
            .field("secret_key", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("request_timeout", &self.request_timeout)
            .field("registry", &self.registry)
            .field("kdf", &self.kdf)
            .finish()
    }
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_secret_key(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = secret.into();
        self
    }

    pub fn with_token_ttl(mut self, ttl: TimeDelta) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COURIER_ADDR` | `127.0.0.1:3000` |
    /// | `COURIER_DB_PATH` | `courier.db` |
    /// | `SECRET_KEY` | required |
    /// | `COURIER_TOKEN_TTL_HOURS` | `480` |
    /// | `COURIER_REQUEST_TIMEOUT_SECS` | `5` |
    /// | `COURIER_SUBSCRIBE_POLICY` | `replace` (or `reject`) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("COURIER_ADDR") {
            config.addr = addr;
        }
        if let Some(path) = lookup("COURIER_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        config.secret_key = lookup("SECRET_KEY")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SECRET_KEY"))?;

        if let Some(raw) = lookup("COURIER_TOKEN_TTL_HOURS") {
            let hours = parse_positive("COURIER_TOKEN_TTL_HOURS", &raw)?;
            // Tokens issued from now on must still have a representable expiry.
            config.token_ttl = i64::try_from(hours)
                .ok()
                .and_then(TimeDelta::try_hours)
                .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
                .ok_or_else(|| ConfigError::Invalid {
                    var: "COURIER_TOKEN_TTL_HOURS",
                    value: raw.clone(),
                    reason: "out of range".to_owned(),
                })?;
        }
        if let Some(raw) = lookup("COURIER_REQUEST_TIMEOUT_SECS") {
            let secs = parse_positive("COURIER_REQUEST_TIMEOUT_SECS", &raw)?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("COURIER_SUBSCRIBE_POLICY") {
            let policy: SubscribePolicy = raw.parse().map_err(|e: ParsePolicyError| {
                ConfigError::Invalid {
                    var: "COURIER_SUBSCRIBE_POLICY",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
            config.registry = config.registry.with_policy(policy);
        }

        Ok(config)
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            var,
            value: raw.to_owned(),
            reason: "must be greater than zero".to_owned(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var,
            value: raw.to_owned(),
            reason: e.to_string(),
        }),
    }
}

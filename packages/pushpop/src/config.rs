use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Default lease granted by a claim.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub database_url: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Lease granted to a claimed message before it may be reclaimed
    pub lease_duration: Duration,
}

impl ClientConfig {
    /// Configuration for `database_url` with default pool and lease settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        Self::from_vars(database_url, |key| env::var(key).ok())
    }

    fn from_vars(database_url: String, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new(database_url);

        if let Some(value) = var("PUSHPOP_MAX_CONNECTIONS") {
            config.max_connections = value
                .parse()
                .context("PUSHPOP_MAX_CONNECTIONS must be a valid number")?;
        }
        if let Some(value) = var("PUSHPOP_LEASE_SECS") {
            let secs: u64 = value
                .parse()
                .context("PUSHPOP_LEASE_SECS must be a valid number of seconds")?;
            config.lease_duration = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

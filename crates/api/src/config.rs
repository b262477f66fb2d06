//! Environment-driven configuration for the API process.

use std::time::Duration;

/// Runtime configuration, read once at bootstrap.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// When true, jobs persist in Postgres; otherwise an in-memory store
    /// (dev/test) is used.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Interval for the background sweeper; `None` disables it (the
    /// `POST /jobs/sweep` trigger still works).
    pub sweep_interval: Option<Duration>,
    /// Claims older than this are presumed abandoned.
    pub stale_after: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            use_persistent_stores: false,
            database_url: None,
            sweep_interval: Some(Duration::from_secs(60)),
            stale_after: Duration::from_secs(300),
        }
    }
}

impl ApiConfig {
    /// Read configuration from the environment:
    /// `BIND_ADDR`, `USE_PERSISTENT_STORES`, `DATABASE_URL`,
    /// `SWEEP_INTERVAL_SECS` (0 disables the sweeper), `STALE_AFTER_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let use_persistent_stores = std::env::var("USE_PERSISTENT_STORES")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let sweep_interval = match env_secs("SWEEP_INTERVAL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.sweep_interval,
        };

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            use_persistent_stores,
            database_url: std::env::var("DATABASE_URL").ok(),
            sweep_interval,
            stale_after: env_secs("STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
        }
    }
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

//! Kernel settings loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Kernel configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Run the extension host automatically during `start()` (default: true).
    pub auto_start: bool,

    /// Upper bound on how long `onStartupFinished` activation waits for the
    /// eager scans to settle (default: 10s).
    pub startup_finished_delay: Duration,

    /// Grace period granted to deactivation during termination
    /// (default: 5s).
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_start: true,
            startup_finished_delay: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let auto_start = env::var("INNESTO_AUTO_START")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .context("INNESTO_AUTO_START must be 'true' or 'false'")?;

        let startup_finished_delay =
            duration_ms_var("INNESTO_STARTUP_FINISHED_TIMEOUT_MS", 10_000)?;
        let shutdown_grace = duration_ms_var("INNESTO_SHUTDOWN_GRACE_MS", 5_000)?;

        Ok(Self {
            auto_start,
            startup_finished_delay,
            shutdown_grace,
        })
    }
}

fn duration_ms_var(name: &str, default_ms: u64) -> Result<Duration> {
    let ms = match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be a duration in milliseconds"))?,
        Err(_) => default_ms,
    };
    Ok(Duration::from_millis(ms))
}

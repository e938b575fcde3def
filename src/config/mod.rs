//! Engine and site configuration
//!
//! Two layers:
//!
//! - [`EngineConfig`] — process-level settings from the environment (TSDB
//!   endpoint, database names, timeouts, retry policy, debug flag). All
//!   optional with defaults.
//! - [`SiteConfig`] — the controlled site: locations, equipment inventory,
//!   task cadences, OAR parameter sets, temperature-source candidate
//!   lists, occupancy windows, pump thresholds, lead-lag groups. Loaded
//!   from TOML (`SITE_CONFIG` env var, then `site_config.toml` in the
//!   working directory), falling back to built-in defaults.
//!
//! Both are plain values owned by the runtime and passed explicitly; there
//! are no ambient configuration singletons.

mod site;

pub use site::{
    DamperStrategy, GroupConfig, LocationConfig, PumpThresholds, SiteConfig, TempControlSource,
    TempSources,
};

use std::time::Duration;

/// Process-level configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TSDB base URL.
    pub tsdb_url: String,
    /// Database holding telemetry and issued commands.
    pub metrics_db: String,
    /// Database the UI publishes operator commands into.
    pub ui_commands_db: String,
    /// Database receiving the command/event audit journal.
    pub audit_db: String,
    /// Per-call TSDB timeout.
    pub tsdb_timeout: Duration,
    /// Attempts per TSDB call (1 = no retry).
    pub tsdb_retries: u32,
    /// Initial retry backoff; doubles per attempt.
    pub tsdb_retry_delay: Duration,
    /// Verbose per-tick logging.
    pub debug: bool,
    /// How long in-flight ticks may finish after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Directory for the sled state snapshot; empty disables persistence.
    pub state_dir: String,
    /// Cadence of state snapshot flushes.
    pub state_flush_interval: Duration,
    /// Evaluate and log, but write nothing.
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tsdb_url: "http://localhost:8181".to_string(),
            metrics_db: "telemetry".to_string(),
            ui_commands_db: "ui_commands".to_string(),
            audit_db: "command_audit".to_string(),
            tsdb_timeout: Duration::from_secs(30),
            tsdb_retries: 3,
            tsdb_retry_delay: Duration::from_secs(1),
            debug: false,
            shutdown_grace: Duration::from_secs(10),
            state_dir: "./data/state".to_string(),
            state_flush_interval: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Resolve from environment variables; every field has a default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tsdb_url: env_string("TSDB_URL", &defaults.tsdb_url),
            metrics_db: env_string("TSDB_METRICS_DB", &defaults.metrics_db),
            ui_commands_db: env_string("TSDB_UI_COMMANDS_DB", &defaults.ui_commands_db),
            audit_db: env_string("TSDB_AUDIT_DB", &defaults.audit_db),
            tsdb_timeout: Duration::from_secs(env_u64("TSDB_TIMEOUT_SECS", 30)),
            tsdb_retries: env_u64("TSDB_RETRIES", 3) as u32,
            tsdb_retry_delay: Duration::from_secs(env_u64("TSDB_RETRY_DELAY_SECS", 1)),
            debug: env_flag("BMS_DEBUG"),
            shutdown_grace: Duration::from_secs(env_u64("BMS_SHUTDOWN_GRACE_SECS", 10)),
            state_dir: env_string("STATE_DIR", &defaults.state_dir),
            state_flush_interval: Duration::from_secs(env_u64("STATE_FLUSH_SECS", 60)),
            dry_run: false,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.tsdb_retries, 3);
        assert_eq!(cfg.tsdb_timeout, Duration::from_secs(30));
        assert_eq!(cfg.tsdb_retry_delay, Duration::from_secs(1));
        assert!(!cfg.dry_run);
    }
}

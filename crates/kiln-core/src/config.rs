//! Engine configuration from environment-style options.

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_COMPACTION_WORKERS: usize = 2;

/// Recognized options:
/// - `KILN_DEVNET`: lightweight/test-network mode. Drops GPU requirements
///   and reduces RAM costs in task type details.
/// - `KILN_POLL_INTERVAL_MS`: poller tick interval.
/// - `KILN_COMPACTION_WORKERS`: worker count for blob store compaction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub devnet: bool,
    pub poll_interval: Duration,
    pub compaction_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            devnet: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            compaction_workers: DEFAULT_COMPACTION_WORKERS,
        }
    }
}

impl EngineConfig {
    /// Parse from the process environment. Unset keys fall back to defaults;
    /// malformed values fall back with a warning rather than failing startup.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("KILN_DEVNET") {
            cfg.devnet = matches!(v.as_str(), "1" | "true" | "yes");
        }

        if let Ok(v) = std::env::var("KILN_POLL_INTERVAL_MS") {
            match v.parse::<u64>() {
                Ok(ms) if ms > 0 => cfg.poll_interval = Duration::from_millis(ms),
                _ => warn!(value = %v, "ignoring bad KILN_POLL_INTERVAL_MS"),
            }
        }

        if let Ok(v) = std::env::var("KILN_COMPACTION_WORKERS") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => cfg.compaction_workers = n,
                _ => warn!(value = %v, "ignoring bad KILN_COMPACTION_WORKERS"),
            }
        }

        cfg
    }
}

//! Runtime settings read from `VISTA_*` environment variables.

use serde::{Deserialize, Serialize};

pub const DEFAULT_QUEUE_CAP: usize = 2048;
pub const DEFAULT_WAIT_SECS: u64 = 8;
pub const DEFAULT_RESYNC_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Ingest channel capacity (`VISTA_QUEUE_CAP`).
    pub queue_cap: usize,
    /// How long a one-shot client waits for the first snapshot (`VISTA_WAIT_SECS`).
    pub wait_secs: u64,
    /// Period after which watchers relist from scratch; 0 disables (`VISTA_RESYNC_SECS`).
    pub resync_secs: u64,
    pub metrics_addr: Option<String>,
    /// `tracing` filter directive (`VISTA_LOG`).
    pub log: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_cap: DEFAULT_QUEUE_CAP,
            wait_secs: DEFAULT_WAIT_SECS,
            resync_secs: DEFAULT_RESYNC_SECS,
            metrics_addr: None,
            log: "info".into(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Build from an arbitrary variable lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parse = |k: &str| lookup(k).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            queue_cap: parse("VISTA_QUEUE_CAP").filter(|v| *v > 0).map(|v| v as usize).unwrap_or(d.queue_cap),
            wait_secs: parse("VISTA_WAIT_SECS").unwrap_or(d.wait_secs),
            resync_secs: parse("VISTA_RESYNC_SECS").unwrap_or(d.resync_secs),
            metrics_addr: lookup("VISTA_METRICS_ADDR").filter(|s| !s.trim().is_empty()),
            log: lookup("VISTA_LOG").filter(|s| !s.trim().is_empty()).unwrap_or(d.log),
        }
    }
}

//! TOML configuration for the runner.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runner configuration loaded from a TOML file or built from defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum number of tests executing concurrently.
    pub worker_limit: usize,

    /// Per-test deadline in milliseconds.
    pub default_timeout_ms: u64,

    /// Window each teardown callback gets to complete, in milliseconds.
    pub teardown_grace_ms: u64,

    /// Divisor shortening the teardown window after a timeout.
    pub timeout_grace_divisor: u32,

    /// Tolerate failures: only `required` cases affect the exit code.
    pub tolerate_failures: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_limit: num_cpus::get(),
            default_timeout_ms: 10_000,
            teardown_grace_ms: 2_000,
            timeout_grace_divisor: 4,
            tolerate_failures: false,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config '{}': {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config '{}': {}", path.display(), e))
    }

    /// Try to load from the given location, fall back to defaults if absent
    /// or malformed.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::load(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("{e}");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Teardown window; shortened when the run already blew its deadline.
    pub(crate) fn teardown_grace(&self, timed_out: bool) -> Duration {
        let ms = if timed_out {
            self.teardown_grace_ms / u64::from(self.timeout_grace_divisor.max(1))
        } else {
            self.teardown_grace_ms
        };
        Duration::from_millis(ms.max(1))
    }
}

//! Observation configuration file
//!
//! ```toml
//! interval_ms = 100
//! follow_links = false
//! watch_limit = 4096
//! quick_notify_first_event = true
//! reconcile_interval_ms = 2000
//! ```

use crate::observation::ObserveOptions;
use crate::tracker::Trackers;
use dirwatch_core::LinkOption;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Watch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Batch delivery interval in milliseconds (default: 100)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Observe a symlinked root through its target (default: false)
    #[serde(default)]
    pub follow_links: bool,

    /// Maximum directories watched below the root
    #[serde(default)]
    pub watch_limit: Option<usize>,

    /// Deliver the first event after a quiet period without waiting (default: true)
    #[serde(default = "default_true")]
    pub quick_notify_first_event: bool,

    /// Rescan interval once the observation is incomplete (default: 2000)
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            follow_links: false,
            watch_limit: None,
            quick_notify_first_event: true,
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    100
}

fn default_reconcile_interval_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl WatchConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn link_option(&self) -> LinkOption {
        if self.follow_links {
            LinkOption::Follow
        } else {
            LinkOption::NoFollow
        }
    }

    pub fn observe_options(&self, trackers: Trackers) -> ObserveOptions {
        ObserveOptions {
            link: self.link_option(),
            watch_limit: self.watch_limit,
            quick_notify_first_event: self.quick_notify_first_event,
            trackers,
        }
    }
}

//! Kernel-imposed inotify limits
//!
//! Read-only view of `/proc/sys/fs/inotify`. Observations never change these,
//! they only degrade gracefully when one is hit.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INOTIFY_SYSCTL_DIR: &str = "/proc/sys/fs/inotify";

/// Failure reading a limit
#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected value in {}: {value:?}", path.display())]
    Parse { path: PathBuf, value: String },
}

/// Snapshot of the inotify sysctls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLimits {
    /// Watches allowed per user across all instances
    pub max_user_watches: u64,
    /// Instances allowed per user
    pub max_user_instances: u64,
    /// Events queued per instance before `IN_Q_OVERFLOW`
    pub max_queued_events: u64,
}

impl KernelLimits {
    /// Read the limits of the running kernel
    pub fn read() -> Result<Self, LimitsError> {
        Self::read_from(Path::new(INOTIFY_SYSCTL_DIR))
    }

    /// Read the limits from a directory laid out like `/proc/sys/fs/inotify`
    pub fn read_from(dir: &Path) -> Result<Self, LimitsError> {
        Ok(Self {
            max_user_watches: read_value(&dir.join("max_user_watches"))?,
            max_user_instances: read_value(&dir.join("max_user_instances"))?,
            max_queued_events: read_value(&dir.join("max_queued_events"))?,
        })
    }
}

fn read_value(path: &Path) -> Result<u64, LimitsError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LimitsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    raw.trim().parse().map_err(|_| LimitsError::Parse {
        path: path.to_path_buf(),
        value: raw.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_from_sysctl_layout() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("max_user_watches"), "8192\n").unwrap();
        fs::write(temp_dir.path().join("max_user_instances"), "128\n").unwrap();
        fs::write(temp_dir.path().join("max_queued_events"), "16384\n").unwrap();

        let limits = KernelLimits::read_from(temp_dir.path()).unwrap();
        assert_eq!(
            limits,
            KernelLimits {
                max_user_watches: 8192,
                max_user_instances: 128,
                max_queued_events: 16384,
            }
        );
    }

    #[test]
    fn test_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("max_user_watches"), "lots").unwrap();

        match KernelLimits::read_from(temp_dir.path()) {
            Err(LimitsError::Parse { value, .. }) => assert_eq!(value, "lots"),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            KernelLimits::read_from(temp_dir.path()),
            Err(LimitsError::Io { .. })
        ));
    }

    #[test]
    fn test_running_kernel() {
        if Path::new(INOTIFY_SYSCTL_DIR).exists() {
            let limits = KernelLimits::read().unwrap();
            assert!(limits.max_user_instances > 0);
        }
    }
}

//! Periodic reconciliation scanner
//!
//! Once an observation is incomplete (watch limit hit, queue overflow,
//! unreadable directory) some changes will never be reported. Comparing
//! snapshots of the root's immediate children catches what was missed, in
//! the same shape as a batch delivery.

use crate::error::ObserveError;
use crate::Event;
use dirwatch_core::{fs as corefs, FileKind, LinkOption, ListError};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryState {
    kind: FileKind,
    len: u64,
    modified: Option<SystemTime>,
}

/// Kind, size and mtime of every immediate child of a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: HashMap<OsString, EntryState>,
}

impl Snapshot {
    pub fn scan(root: &Path, link: LinkOption) -> Result<Self, ObserveError> {
        let mut entries = HashMap::new();

        for child in corefs::list_children(root, link) {
            let child = match child {
                Ok(child) => child,
                Err(ListError::Root(e)) => return Err(ObserveError::from_io(e, root)),
                Err(ListError::Entry(e)) => {
                    debug!("Skipping entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            // Entries can vanish between listing and stat
            let Ok(metadata) = std::fs::symlink_metadata(root.join(&child.name)) else {
                continue;
            };
            entries.insert(
                child.name,
                EntryState {
                    kind: child.kind,
                    len: metadata.len(),
                    modified: metadata.modified().ok(),
                },
            );
        }

        Ok(Self { entries })
    }

    /// Changes from `self` to `newer`
    ///
    /// An entry whose kind changed was replaced, and reads as `Create`.
    pub fn diff(&self, newer: &Snapshot) -> HashMap<OsString, Event> {
        let mut changes = HashMap::new();

        for (name, state) in &newer.entries {
            match self.entries.get(name) {
                None => {
                    changes.insert(name.clone(), Event::Create);
                }
                Some(old) if old.kind != state.kind => {
                    changes.insert(name.clone(), Event::Create);
                }
                Some(old) if old != state => {
                    changes.insert(name.clone(), Event::Modify);
                }
                Some(_) => {}
            }
        }
        for name in self.entries.keys() {
            if !newer.entries.contains_key(name) {
                changes.insert(name.clone(), Event::Delete);
            }
        }

        changes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &OsString) -> bool {
        self.entries.contains_key(name)
    }
}

/// Periodic reconciliation scanner
///
/// Rescans the root's immediate children on a fixed interval and sends
/// every non-empty difference from the previous scan.
pub struct PeriodicReconciler {
    root: PathBuf,
    link: LinkOption,
    interval: Duration,
    change_tx: mpsc::Sender<HashMap<OsString, Event>>,
}

impl PeriodicReconciler {
    pub fn new(
        root: PathBuf,
        link: LinkOption,
        interval: Duration,
        change_tx: mpsc::Sender<HashMap<OsString, Event>>,
    ) -> Self {
        Self {
            root,
            link,
            interval,
            change_tx,
        }
    }

    /// Run until the receiver goes away or the root can no longer be listed
    pub async fn run(self) -> Result<(), ObserveError> {
        let mut timer = interval(self.interval);
        let mut previous = Snapshot::scan(&self.root, self.link)?;

        info!(
            "Starting periodic reconciliation of {} (interval: {:?})",
            self.root.display(),
            self.interval
        );

        loop {
            timer.tick().await;

            let current = match Snapshot::scan(&self.root, self.link) {
                Ok(current) => current,
                Err(err @ ObserveError::NotFound(_)) => return Err(err),
                Err(err) => {
                    warn!("Periodic reconciliation scan failed: {}", err);
                    continue;
                }
            };

            let changes = previous.diff(&current);
            previous = current;
            if changes.is_empty() {
                debug!("Periodic reconciliation: no missed changes");
                continue;
            }

            info!("Periodic reconciliation found {} missed changes", changes.len());
            if self.change_tx.send(changes).await.is_err() {
                debug!("Reconciliation receiver dropped, stopping");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    fn scan(dir: &TempDir) -> Snapshot {
        Snapshot::scan(dir.path(), LinkOption::NoFollow).unwrap()
    }

    #[test]
    fn test_diff_create_delete_modify() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep"), b"1").unwrap();
        fs::write(dir.path().join("gone"), b"1").unwrap();
        fs::write(dir.path().join("edit"), b"1").unwrap();
        let before = scan(&dir);
        assert_eq!(before.len(), 3);

        fs::remove_file(dir.path().join("gone")).unwrap();
        fs::write(dir.path().join("new"), b"1").unwrap();
        fs::write(dir.path().join("edit"), b"longer").unwrap();
        let after = scan(&dir);

        let changes = before.diff(&after);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes.get(&OsString::from("gone")), Some(&Event::Delete));
        assert_eq!(changes.get(&OsString::from("new")), Some(&Event::Create));
        assert_eq!(changes.get(&OsString::from("edit")), Some(&Event::Modify));
    }

    #[test]
    fn test_replaced_entry_reads_as_create() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), b"1").unwrap();
        let before = scan(&dir);

        fs::remove_file(dir.path().join("x")).unwrap();
        fs::create_dir(dir.path().join("x")).unwrap();

        let changes = before.diff(&scan(&dir));
        assert_eq!(changes.get(&OsString::from("x")), Some(&Event::Create));
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = Snapshot::scan(&dir.path().join("gone"), LinkOption::NoFollow).unwrap_err();
        assert!(matches!(err, ObserveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reconciliation_finds_missed_changes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file1.txt");
        fs::write(&file, b"content 1").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let reconciler = PeriodicReconciler::new(
            dir.path().to_path_buf(),
            LinkOption::NoFollow,
            Duration::from_millis(100),
            tx,
        );
        tokio::spawn(reconciler.run());

        tokio::time::sleep(Duration::from_millis(250)).await;

        // Simulate a change the watcher missed
        let later = SystemTime::now() + Duration::from_secs(60);
        set_file_mtime(&file, FileTime::from_system_time(later)).unwrap();

        let changes = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get(&OsString::from("file1.txt")), Some(&Event::Modify));
    }

    #[tokio::test]
    async fn test_reconciliation_ignores_unchanged_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.txt"), b"old").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let reconciler = PeriodicReconciler::new(
            dir.path().to_path_buf(),
            LinkOption::NoFollow,
            Duration::from_millis(50),
            tx,
        );
        tokio::spawn(reconciler.run());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(rx.try_recv().is_err());
    }
}

//! Watch registry
//!
//! Bidirectional map between directory paths (relative to the observed
//! root, the root itself being the empty path) and their watch
//! descriptors. Only descriptors whose `add_watch` succeeded are ever
//! registered, so every key of the reverse map is a valid descriptor.
//!
//! Owned by the observation's reader thread; never shared.

use crate::platform::WatchDescriptor;
use ahash::AHashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    by_path: AHashMap<PathBuf, WatchDescriptor>,
    by_wd: AHashMap<WatchDescriptor, PathBuf>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` is watched through `wd`
    ///
    /// inotify hands out one descriptor per inode, so a descriptor that is
    /// already known under another path is moved to `path`. A stale
    /// descriptor previously registered for `path` is returned.
    pub fn register(&mut self, path: PathBuf, wd: WatchDescriptor) -> Option<WatchDescriptor> {
        if let Some(old_path) = self.by_wd.remove(&wd) {
            self.by_path.remove(&old_path);
        }
        let previous = self.by_path.insert(path.clone(), wd);
        if let Some(previous) = previous {
            if previous != wd {
                self.by_wd.remove(&previous);
            }
        }
        self.by_wd.insert(wd, path);
        previous.filter(|previous| *previous != wd)
    }

    /// Forget `path`, returning its descriptor
    pub fn unregister(&mut self, path: &Path) -> Option<WatchDescriptor> {
        let wd = self.by_path.remove(path)?;
        self.by_wd.remove(&wd);
        Some(wd)
    }

    /// Forget whatever `wd` was registered for
    pub fn unregister_wd(&mut self, wd: WatchDescriptor) -> Option<PathBuf> {
        let path = self.by_wd.remove(&wd)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Forget `path` and every registered directory below it
    pub fn unregister_subtree(&mut self, path: &Path) -> Vec<WatchDescriptor> {
        let doomed: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|candidate| candidate.starts_with(path))
            .cloned()
            .collect();
        doomed
            .iter()
            .filter_map(|candidate| self.unregister(candidate))
            .collect()
    }

    pub fn lookup(&self, path: &Path) -> Option<WatchDescriptor> {
        self.by_path.get(path).copied()
    }

    pub fn resolve(&self, wd: WatchDescriptor) -> Option<&Path> {
        self.by_wd.get(&wd).map(PathBuf::as_path)
    }

    /// Remove everything, returning what was registered
    pub fn drain(&mut self) -> Vec<(PathBuf, WatchDescriptor)> {
        self.by_wd.clear();
        self.by_path.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

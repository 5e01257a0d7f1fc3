//! Live tree extension
//!
//! `WatchedTree` pairs an inotify instance with the registry of what it
//! watches, and keeps the two consistent as directories come and go below
//! the root. Once the kernel refuses a watch for lack of resources the tree
//! stops trying for the rest of its life: existing watches keep working,
//! new directories simply go unwatched.

use crate::error::ObserveError;
use crate::platform::{AddWatchFlags, Instance, RawEvent, WatchDescriptor, CHILD_DIR_MASK};
use crate::registry::WatchRegistry;
use dirwatch_core::fs as corefs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct WatchedTree {
    root: PathBuf,
    instance: Instance,
    registry: WatchRegistry,
    exhausted: bool,
}

impl WatchedTree {
    pub fn new(root: PathBuf, instance: Instance) -> Self {
        Self {
            root,
            instance,
            registry: WatchRegistry::new(),
            exhausted: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Watch the root itself, registered under the empty path
    pub fn watch_root(&mut self, mask: AddWatchFlags) -> Result<WatchDescriptor, ObserveError> {
        let wd = self.instance.add_watch(&self.root, mask)?;
        self.registry.register(PathBuf::new(), wd);
        Ok(wd)
    }

    /// Watch the directory at `rel` below the root
    ///
    /// `Ok(None)` when nothing was added: the directory vanished, is not a
    /// directory any more, or watch resources ran out earlier. An error is
    /// something the client should hear about; resource exhaustion is
    /// reported only the first time.
    pub fn watch_dir(&mut self, rel: &Path) -> Result<Option<WatchDescriptor>, ObserveError> {
        if self.exhausted {
            return Ok(None);
        }

        let path = self.root.join(rel);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Ok(None),
        }
        if !corefs::is_readable_dir(&path) {
            warn!("Skipping unreadable directory {}", path.display());
            return Err(ObserveError::PermissionDenied(path));
        }

        match self.instance.add_watch(&path, CHILD_DIR_MASK) {
            Ok(wd) => {
                if let Some(stale) = self.registry.register(rel.to_path_buf(), wd) {
                    self.forget(stale);
                }
                Ok(Some(wd))
            }
            Err(ObserveError::NotFound(_)) => Ok(None),
            Err(err) if err.is_resource_exhausted() => {
                warn!(
                    "Watch limit reached at {}; new directories will not be watched",
                    path.display()
                );
                self.exhausted = true;
                Err(err)
            }
            Err(err) => {
                warn!("Failed to watch {}: {}", path.display(), err);
                Err(err)
            }
        }
    }

    /// A directory appeared at `rel`: watch it
    pub fn directory_appeared(&mut self, rel: &Path) -> Result<(), ObserveError> {
        self.watch_dir(rel).map(|_| ())
    }

    /// The directory at `rel` was deleted or moved away: drop it and everything below
    pub fn directory_vanished(&mut self, rel: &Path) {
        for wd in self.registry.unregister_subtree(rel) {
            self.forget(wd);
        }
    }

    /// The kernel dropped `wd` (`IN_IGNORED`); returns the path it watched
    pub fn watch_released(&mut self, wd: WatchDescriptor) -> Option<PathBuf> {
        let path = self.registry.unregister_wd(wd);
        self.instance.watch_released(wd);
        path
    }

    pub fn read_events(&self) -> Result<Vec<RawEvent>, ObserveError> {
        self.instance.read_events()
    }

    /// Directories watched below the root
    pub fn watched_directories(&self) -> usize {
        let root = usize::from(self.registry.lookup(Path::new("")).is_some());
        self.registry.len() - root
    }

    /// Remove every watch and close the instance
    pub fn release(&mut self) {
        if self.instance.is_closed() {
            return;
        }
        let registered = self.registry.drain();
        debug!(
            "Releasing {} watches under {}",
            registered.len(),
            self.root.display()
        );
        for (_, wd) in registered {
            self.forget(wd);
        }
        self.instance.close();
    }

    fn forget(&mut self, wd: WatchDescriptor) {
        match self.instance.remove_watch(wd) {
            Ok(()) | Err(ObserveError::InvalidDescriptor(_)) => {}
            Err(err) => warn!("Failed to remove watch {:?}: {}", wd, err),
        }
    }
}

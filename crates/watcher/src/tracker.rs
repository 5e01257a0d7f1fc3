//! Low-level instrumentation of inotify calls
//!
//! A `Trackers` collection is handed to observations through
//! `ObserveOptions`. Every instance created with it reports init, watch
//! add/remove and close. Listeners are held weakly: dropping the last
//! `Arc` of a tracker unregisters it.

use crate::platform::{AddWatchFlags, WatchDescriptor};
use parking_lot::RwLock;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::{Arc, Weak};

/// Receives every low-level inotify operation of the observations it is attached to
///
/// Called synchronously from the thread doing the operation, so
/// implementations must be quick and must not block.
pub trait Tracker: Send + Sync {
    fn on_init(&self, _fd: RawFd) {}

    fn on_watch_added(&self, _fd: RawFd, _path: &Path, _mask: AddWatchFlags, _wd: WatchDescriptor) {}

    fn on_watch_removed(&self, _fd: RawFd, _wd: WatchDescriptor) {}

    fn on_close(&self, _fd: RawFd) {}
}

/// Shared, weakly-referencing set of trackers
#[derive(Clone, Default)]
pub struct Trackers {
    inner: Arc<RwLock<Vec<Weak<dyn Tracker>>>>,
}

impl Trackers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start reporting to `tracker`
    pub fn register(&self, tracker: &Arc<dyn Tracker>) {
        self.inner.write().push(Arc::downgrade(tracker));
    }

    /// Stop reporting to `tracker`, pruning dead entries on the way
    pub fn unregister(&self, tracker: &Arc<dyn Tracker>) {
        self.inner.write().retain(|weak| match weak.upgrade() {
            Some(current) => !Arc::ptr_eq(&current, tracker),
            None => false,
        });
    }

    /// Number of live trackers
    pub fn len(&self) -> usize {
        self.inner.read().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify(&self, f: impl Fn(&dyn Tracker)) {
        let mut dead = false;
        {
            let trackers = self.inner.read();
            if trackers.is_empty() {
                return;
            }
            for weak in trackers.iter() {
                match weak.upgrade() {
                    Some(tracker) => f(tracker.as_ref()),
                    None => dead = true,
                }
            }
        }
        if dead {
            self.inner.write().retain(|weak| weak.strong_count() > 0);
        }
    }
}

impl std::fmt::Debug for Trackers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trackers").field("len", &self.len()).finish()
    }
}

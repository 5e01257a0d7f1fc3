//! Directory change observation over inotify
//!
//! Observes a directory (or a regular file) and reports changes to it and
//! to its immediate children:
//! - Whole-tree discovery before `observe` returns, with a per-child consumer
//! - Directories appearing below the root are watched as they appear
//! - Immediate or batched delivery (latest event per child, fixed-delay ticks)
//! - Degradation instead of failure when kernel limits run out
//! - Prompt, idempotent close that releases every kernel resource

#[cfg(not(target_os = "linux"))]
compile_error!("the watcher crate requires Linux inotify");

pub mod config;
pub mod debounce;
pub mod error;
pub mod platform;
pub mod reconcile;
pub mod tracker;

mod discovery;
mod extend;
mod guard;
mod observation;
mod registry;
mod translate;

pub use config::{ConfigError, WatchConfig};
pub use debounce::{BatchState, Delivery};
pub use dirwatch_core::LinkOption;
pub use error::{CloseReason, ObserveError};
pub use observation::{observe_with, Observation, ObserveOptions};
pub use reconcile::{PeriodicReconciler, Snapshot};
pub use tracker::{Tracker, Trackers};

use serde::Serialize;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::time::Duration;

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Entry created or moved in
    Create,
    /// Entry deleted or moved out
    Delete,
    /// Content or attributes changed
    Modify,
}

/// Receives events one at a time, on the observation's reader thread
pub trait Observer: Send {
    /// `child` is the name of the immediate child affected, `None` for the observed path itself
    fn on_event(&mut self, event: Event, child: Option<&OsStr>);

    /// Some changes will not be reported from now on; rescan to catch up
    fn on_incomplete_observation(&mut self, cause: &ObserveError);
}

/// Receives coalesced batches, never concurrently with itself
pub trait BatchObserver: Send {
    /// Only called when something changed since the previous batch
    fn on_latest_events(&mut self, self_changed: bool, children: HashMap<OsString, Event>);

    fn on_incomplete_observation(&mut self, cause: &ObserveError);
}

/// Observe `path`, delivering every event immediately
pub fn observe(
    path: &Path,
    link: LinkOption,
    observer: impl Observer + 'static,
) -> Result<Observation, ObserveError> {
    observe_with(
        path,
        ObserveOptions::new(link),
        Delivery::Immediate(Box::new(observer)),
        &mut |_| {},
    )
}

/// Observe `path`, handing every immediate child found at start to `consumer`
pub fn observe_with_children(
    path: &Path,
    link: LinkOption,
    observer: impl Observer + 'static,
    mut consumer: impl FnMut(&Path),
) -> Result<Observation, ObserveError> {
    observe_with(
        path,
        ObserveOptions::new(link),
        Delivery::Immediate(Box::new(observer)),
        &mut consumer,
    )
}

/// Observe `path`, delivering the latest event per child at most once per `interval`
pub fn observe_batched(
    path: &Path,
    link: LinkOption,
    observer: impl BatchObserver + 'static,
    mut consumer: impl FnMut(&Path),
    interval: Duration,
) -> Result<Observation, ObserveError> {
    observe_with(
        path,
        ObserveOptions::new(link),
        Delivery::Batched {
            observer: Box::new(observer),
            interval,
        },
        &mut consumer,
    )
}

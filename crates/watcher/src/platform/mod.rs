//! Platform-specific change-notification bindings
//!
//! Only Linux inotify is supported: one instance per observation, one
//! watch descriptor per watched directory.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{
    poll_readiness, AddWatchFlags, Instance, RawEvent, Readiness, WatchDescriptor, Waker,
    CHILD_DIR_MASK, ROOT_MASK,
};

#[cfg(all(test, target_os = "linux"))]
pub(crate) use linux::test_descriptors;

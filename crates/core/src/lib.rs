//! Path and file primitives for dirwatch
//!
//! The observation engine only needs a narrow view of the filesystem:
//! - Classifying a path (`stat`) under a symlink policy
//! - Listing the immediate children of a directory
//! - Cheap permission and filesystem-type queries
//! - The kernel's inotify limits

pub mod fs;
pub mod limits;

pub use fs::{DirChild, FileKind, LinkOption, ListError};
pub use limits::KernelLimits;

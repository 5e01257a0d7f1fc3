//! Observation failures

use crate::platform::WatchDescriptor;
use nix::errno::Errno;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by `observe` and reported through degradation notices
#[derive(Debug, Error)]
pub enum ObserveError {
    /// The path is neither a directory nor a regular file
    #[error("cannot observe {}: not a directory or regular file", .0.display())]
    InvalidArgument(PathBuf),

    #[error("no such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// An inotify instance, watch or queue limit was hit
    #[error("inotify resource limit reached: {0}")]
    ResourceExhausted(String),

    /// The kernel no longer knows this watch descriptor
    #[error("invalid watch descriptor: {0:?}")]
    InvalidDescriptor(WatchDescriptor),

    #[error("unsupported filesystem: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ObserveError {
    /// Map an errno from an inotify call on `path` into the domain taxonomy
    pub(crate) fn from_errno(errno: Errno, path: &Path) -> Self {
        match errno {
            Errno::ENOENT | Errno::ENOTDIR => ObserveError::NotFound(path.to_path_buf()),
            Errno::EACCES | Errno::EPERM => ObserveError::PermissionDenied(path.to_path_buf()),
            Errno::ENOSPC | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE => {
                ObserveError::ResourceExhausted(format!("{} ({})", errno.desc(), path.display()))
            }
            other => ObserveError::Io {
                path: path.to_path_buf(),
                source: io::Error::from(other),
            },
        }
    }

    /// Map a listing or stat failure on `path`
    pub(crate) fn from_io(source: io::Error, path: &Path) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => ObserveError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => ObserveError::PermissionDenied(path.to_path_buf()),
            _ => ObserveError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, ObserveError::ResourceExhausted(_))
    }
}

/// Why an observation reached its terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `Observation::close` was called (or the handle was dropped)
    Requested,
    /// The observed root was deleted or moved away
    RootGone,
    /// The root lives somewhere inotify cannot watch
    Unsupported(String),
    /// Setup or the reader thread failed
    Failed(String),
}

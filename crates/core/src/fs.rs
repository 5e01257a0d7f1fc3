//! Filesystem queries used during discovery

use nix::sys::statfs::{statfs, PROC_SUPER_MAGIC};
use nix::unistd::{access, AccessFlags};
use std::ffi::OsString;
use std::fs::FileType;
use std::io;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// Whether a symlink at the observed root is resolved
///
/// Only ever applies to the root. Children are never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkOption {
    /// Resolve the root through its target
    Follow,
    /// Treat the root as the link itself
    #[default]
    NoFollow,
}

/// Coarse classification of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
    Symlink,
    /// Sockets, fifos, devices
    Other,
}

impl FileKind {
    pub fn is_dir(self) -> bool {
        self == FileKind::Directory
    }
}

impl From<FileType> for FileKind {
    fn from(file_type: FileType) -> Self {
        if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        }
    }
}

/// One immediate child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChild {
    /// File name relative to the listed directory
    pub name: OsString,
    /// Kind of the entry itself (symlinks are not resolved)
    pub kind: FileKind,
}

/// Failure while listing a directory
#[derive(Debug, Error)]
pub enum ListError {
    /// The directory itself could not be opened
    #[error("failed to open directory: {0}")]
    Root(#[source] io::Error),

    /// A single entry could not be read; listing continues
    #[error("failed to read directory entry: {0}")]
    Entry(#[source] io::Error),
}

impl ListError {
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            ListError::Root(e) | ListError::Entry(e) => e.kind(),
        }
    }
}

/// Classify `path`, resolving a final symlink only for `LinkOption::Follow`
pub fn stat(path: &Path, link: LinkOption) -> io::Result<FileKind> {
    let metadata = match link {
        LinkOption::Follow => std::fs::metadata(path)?,
        LinkOption::NoFollow => std::fs::symlink_metadata(path)?,
    };
    Ok(FileKind::from(metadata.file_type()))
}

/// List the immediate children of `root`
///
/// With `LinkOption::Follow` a symlinked root is listed through its target.
/// Entries are yielded sorted by file name and never followed.
pub fn list_children(
    root: &Path,
    link: LinkOption,
) -> impl Iterator<Item = Result<DirChild, ListError>> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .follow_root_links(link == LinkOption::Follow)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| match entry {
            Ok(entry) => Ok(DirChild {
                name: entry.file_name().to_os_string(),
                kind: FileKind::from(entry.file_type()),
            }),
            Err(e) if e.depth() == 0 => Err(ListError::Root(io::Error::from(e))),
            Err(e) => Err(ListError::Entry(io::Error::from(e))),
        })
}

/// Whether the current process may list and watch `path`
///
/// Only a pre-filter: the kernel has the final word when the watch is added.
pub fn is_readable_dir(path: &Path) -> bool {
    access(path, AccessFlags::R_OK | AccessFlags::X_OK).is_ok()
}

/// Whether `path` lives on procfs, where inotify does not report changes
pub fn is_procfs(path: &Path) -> bool {
    match statfs(path) {
        Ok(stats) => stats.filesystem_type() == PROC_SUPER_MAGIC,
        Err(_) => false,
    }
}

//! Raw inotify record → domain event
//!
//! Translation is pure: it resolves the descriptor through the registry,
//! classifies the mask, and says what the client should see and what the
//! registry should do. Acting on either is the reader loop's job, and the
//! two are independent of each other.

use crate::platform::{AddWatchFlags, RawEvent, WatchDescriptor};
use crate::registry::WatchRegistry;
use crate::Event;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// What a single raw record means
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Entry created in, or moved into, the watched directory
    Created { name: OsString, is_dir: bool },
    /// Entry deleted from, or moved out of, the watched directory
    Deleted { name: OsString, is_dir: bool },
    /// Entry content or attributes changed
    Modified { name: OsString },
    /// The watched inode's own content or attributes changed
    SelfModified,
    /// The watched inode was deleted or moved away
    SelfGone,
    /// The filesystem holding the watched inode was unmounted
    Unmounted,
    /// The kernel dropped the watch
    Ignored,
    /// The kernel queue overflowed and events were lost
    Overflow,
}

/// Registry bookkeeping requested by a translated event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DirectoryChange {
    Appeared(PathBuf),
    Vanished(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Translation {
    pub wd: WatchDescriptor,
    /// Watched directory the record came from, relative to the root
    pub owner: PathBuf,
    pub transition: Transition,
}

/// Classify a mask; `None` for combinations this engine does not act on
pub(crate) fn classify(mask: AddWatchFlags, name: Option<OsString>) -> Option<Transition> {
    if mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
        return Some(Transition::Overflow);
    }
    if mask.contains(AddWatchFlags::IN_IGNORED) {
        return Some(Transition::Ignored);
    }

    let is_dir = mask.contains(AddWatchFlags::IN_ISDIR);
    match name {
        Some(name) => {
            if mask.intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO) {
                Some(Transition::Created { name, is_dir })
            } else if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
                Some(Transition::Deleted { name, is_dir })
            } else if mask.intersects(
                AddWatchFlags::IN_ATTRIB | AddWatchFlags::IN_MODIFY | AddWatchFlags::IN_CLOSE_WRITE,
            ) {
                Some(Transition::Modified { name })
            } else {
                None
            }
        }
        None => {
            if mask.intersects(AddWatchFlags::IN_DELETE_SELF | AddWatchFlags::IN_MOVE_SELF) {
                Some(Transition::SelfGone)
            } else if mask.contains(AddWatchFlags::IN_UNMOUNT) {
                Some(Transition::Unmounted)
            } else if mask.intersects(AddWatchFlags::IN_ATTRIB | AddWatchFlags::IN_MODIFY) {
                Some(Transition::SelfModified)
            } else {
                None
            }
        }
    }
}

/// Resolve and classify `raw`
///
/// Records for descriptors the registry no longer knows are dropped: they
/// belong to watches that were removed while the records were queued.
pub(crate) fn translate(registry: &WatchRegistry, raw: RawEvent) -> Option<Translation> {
    if raw.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
        return Some(Translation {
            wd: raw.wd,
            owner: PathBuf::new(),
            transition: Transition::Overflow,
        });
    }

    let Some(owner) = registry.resolve(raw.wd) else {
        debug!("Dropping event for unknown {:?} {:?}", raw.wd, raw.mask);
        return None;
    };
    let owner = owner.to_path_buf();

    let Some(transition) = classify(raw.mask, raw.name.clone()) else {
        debug!(
            "Dropping unhandled event {:?} on {:?} (name={:?})",
            raw.mask,
            owner,
            raw.name
        );
        return None;
    };

    Some(Translation {
        wd: raw.wd,
        owner,
        transition,
    })
}

impl Translation {
    /// Whether the record came from the root's own watch
    pub fn from_root(&self) -> bool {
        self.owner.as_os_str().is_empty()
    }

    /// Path of the affected entry relative to the root
    pub fn logical_path(&self) -> PathBuf {
        match &self.transition {
            Transition::Created { name, .. }
            | Transition::Deleted { name, .. }
            | Transition::Modified { name } => self.owner.join(name),
            _ => self.owner.clone(),
        }
    }

    /// Event for the client, attributed to an immediate child of the root or to the root itself
    ///
    /// Changes below an immediate child directory surface as a modification
    /// of that child.
    pub fn domain_event(&self) -> Option<(Event, Option<OsString>)> {
        if self.from_root() {
            return match &self.transition {
                Transition::Created { name, .. } => Some((Event::Create, Some(name.clone()))),
                Transition::Deleted { name, .. } => Some((Event::Delete, Some(name.clone()))),
                Transition::Modified { name } => Some((Event::Modify, Some(name.clone()))),
                Transition::SelfModified => Some((Event::Modify, None)),
                Transition::SelfGone | Transition::Unmounted => Some((Event::Delete, None)),
                Transition::Ignored | Transition::Overflow => None,
            };
        }

        match &self.transition {
            Transition::Created { .. }
            | Transition::Deleted { .. }
            | Transition::Modified { .. } => {
                top_level_child(&self.owner).map(|child| (Event::Modify, Some(child)))
            }
            _ => None,
        }
    }

    /// Directory appearing or vanishing below a watched directory
    pub fn directory_change(&self) -> Option<DirectoryChange> {
        match &self.transition {
            Transition::Created { is_dir: true, .. } => {
                Some(DirectoryChange::Appeared(self.logical_path()))
            }
            Transition::Deleted { is_dir: true, .. } => {
                Some(DirectoryChange::Vanished(self.logical_path()))
            }
            _ => None,
        }
    }

    /// Whether the observed root itself is gone
    pub fn root_lost(&self) -> bool {
        self.from_root()
            && matches!(
                self.transition,
                Transition::SelfGone | Transition::Unmounted | Transition::Ignored
            )
    }
}

fn top_level_child(path: &Path) -> Option<OsString> {
    match path.components().next() {
        Some(Component::Normal(name)) => Some(name.to_os_string()),
        _ => None,
    }
}

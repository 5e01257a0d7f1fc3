//! Initial tree discovery
//!
//! Runs on the caller's thread before the reader starts: the root is
//! watched first, then every immediate child is handed to the consumer and
//! child directories get their own watch. Anything that happens after a
//! watch is in place is queued by the kernel, so nothing between discovery
//! and the first read is lost.

use crate::error::ObserveError;
use crate::extend::WatchedTree;
use crate::platform::{AddWatchFlags, ROOT_MASK};
use dirwatch_core::{fs as corefs, FileKind, LinkOption, ListError};
use std::path::Path;
use tracing::{debug, warn};

/// Why discovery could not complete
#[derive(Debug)]
pub(crate) enum DiscoveryFailure {
    /// The root watch could not be added
    RootWatch(ObserveError),
    /// The root disappeared between the initial stat and the listing
    RootVanished,
    /// The root could not be listed
    Listing(ObserveError),
}

/// Inotify mask for the root under `link`
pub(crate) fn root_mask(link: LinkOption) -> AddWatchFlags {
    match link {
        LinkOption::Follow => ROOT_MASK,
        LinkOption::NoFollow => ROOT_MASK | AddWatchFlags::IN_DONT_FOLLOW,
    }
}

/// Watch the root and its immediate child directories
///
/// Returns the degradation notices collected on the way, in order.
pub(crate) fn discover(
    tree: &mut WatchedTree,
    link: LinkOption,
    kind: FileKind,
    consumer: &mut dyn FnMut(&Path),
) -> Result<Vec<ObserveError>, DiscoveryFailure> {
    tree.watch_root(root_mask(link)).map_err(|err| match err {
        ObserveError::NotFound(_) => DiscoveryFailure::RootVanished,
        other => DiscoveryFailure::RootWatch(other),
    })?;

    let mut notices = Vec::new();
    if !kind.is_dir() {
        return Ok(notices);
    }

    let root = tree.root().to_path_buf();
    for child in corefs::list_children(&root, link) {
        let child = match child {
            Ok(child) => child,
            Err(ListError::Root(e)) => {
                let err = ObserveError::from_io(e, &root);
                return Err(match err {
                    ObserveError::NotFound(_) => DiscoveryFailure::RootVanished,
                    other => DiscoveryFailure::Listing(other),
                });
            }
            Err(ListError::Entry(e)) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        consumer(&root.join(&child.name));

        if child.kind.is_dir() {
            if let Err(notice) = tree.watch_dir(Path::new(&child.name)) {
                notices.push(notice);
            }
        }
    }

    debug!(
        "Discovered {} watched directories under {}",
        tree.watched_directories(),
        root.display()
    );
    Ok(notices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Instance;
    use crate::tracker::Trackers;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn tree(root: &Path, watch_limit: Option<usize>) -> WatchedTree {
        let instance = Instance::open(Trackers::new(), watch_limit).unwrap();
        WatchedTree::new(root.to_path_buf(), instance)
    }

    #[test]
    fn test_discover_children() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();

        let mut tree = tree(dir.path(), None);
        let mut seen: Vec<PathBuf> = Vec::new();
        let notices = discover(
            &mut tree,
            LinkOption::NoFollow,
            FileKind::Directory,
            &mut |path| seen.push(path.to_path_buf()),
        )
        .unwrap();

        assert!(notices.is_empty());
        assert_eq!(
            seen,
            vec![dir.path().join("a"), dir.path().join("b"), dir.path().join("f")]
        );
        assert_eq!(tree.watched_directories(), 2);
    }

    #[test]
    fn test_only_immediate_children_are_watched() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/deep")).unwrap();

        let mut tree = tree(dir.path(), None);
        discover(&mut tree, LinkOption::NoFollow, FileKind::Directory, &mut |_| {}).unwrap();

        assert_eq!(tree.watched_directories(), 1);
    }

    #[test]
    fn test_file_root_has_no_children() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();

        let mut tree = tree(&file, None);
        let mut calls = 0;
        discover(&mut tree, LinkOption::NoFollow, FileKind::File, &mut |_| calls += 1).unwrap();

        assert_eq!(calls, 0);
        assert_eq!(tree.instance().live_watches(), 1);
    }

    #[test]
    fn test_exhaustion_becomes_single_notice() {
        let dir = TempDir::new().unwrap();
        for name in ["a", "b", "c", "d"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let mut tree = tree(dir.path(), Some(3));
        let mut calls = 0;
        let notices = discover(
            &mut tree,
            LinkOption::NoFollow,
            FileKind::Directory,
            &mut |_| calls += 1,
        )
        .unwrap();

        assert_eq!(calls, 4);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].is_resource_exhausted());
        assert_eq!(tree.watched_directories(), 2);
    }

    #[test]
    fn test_missing_root_is_vanished() {
        let dir = TempDir::new().unwrap();
        let mut tree = tree(&dir.path().join("gone"), None);

        let failure =
            discover(&mut tree, LinkOption::NoFollow, FileKind::Directory, &mut |_| {})
                .unwrap_err();
        assert!(matches!(failure, DiscoveryFailure::RootVanished));
    }
}

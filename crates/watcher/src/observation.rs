//! Observation lifecycle and reader loop
//!
//! `observe_with` validates the root, discovers the tree on the calling
//! thread, then hands the watched tree to a dedicated reader thread. The
//! returned `Observation` is the only way to stop it; dropping the handle
//! closes it too.

use crate::debounce::{Delivery, Dispatcher};
use crate::discovery::{self, DiscoveryFailure};
use crate::error::{CloseReason, ObserveError};
use crate::extend::WatchedTree;
use crate::guard::ObservationState;
use crate::platform::{poll_readiness, Instance, Readiness, Waker};
use crate::tracker::Trackers;
use crate::translate::{translate, DirectoryChange, Transition, Translation};
use crate::Event;
use dirwatch_core::{fs as corefs, FileKind, LinkOption};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Knobs for a single observation
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    /// Whether a symlinked root is observed through its target
    pub link: LinkOption,
    /// Maximum number of directories watched below the root
    pub watch_limit: Option<usize>,
    /// Batched delivery only: deliver the first event after a quiet interval immediately
    pub quick_notify_first_event: bool,
    /// Receives every low-level inotify call made for this observation
    pub trackers: Trackers,
}

impl ObserveOptions {
    pub fn new(link: LinkOption) -> Self {
        Self {
            link,
            ..Self::default()
        }
    }
}

/// Handle to a running (or already finished) observation
#[derive(Debug)]
pub struct Observation {
    root: PathBuf,
    state: Arc<ObservationState>,
    reader: Option<JoinHandle<()>>,
}

impl Observation {
    fn closed(root: PathBuf, reason: CloseReason, incomplete: bool) -> Self {
        Self {
            root,
            state: Arc::new(ObservationState::closed(reason, incomplete)),
            reader: None,
        }
    }

    /// Stop observing and release every kernel resource
    ///
    /// Idempotent. Returns once the reader thread is gone, except when
    /// called from one of this observation's own callbacks: the reader then
    /// finishes tearing down as soon as the callback returns.
    pub fn close(&mut self) {
        if self.state.close_with(CloseReason::Requested) {
            debug!("Closing observation of {}", self.root.display());
        }
        self.state.wake();

        let Some(reader) = self.reader.take() else {
            return;
        };
        if reader.thread().id() == thread::current().id() {
            return;
        }
        if reader.join().is_err() {
            warn!("Observation reader for {} panicked", self.root.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Whether a degradation notice was ever issued
    pub fn is_incomplete(&self) -> bool {
        self.state.is_incomplete()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.close_reason()
    }

    /// Number of directories currently watched below the root
    pub fn watched_directories(&self) -> usize {
        self.state.watched()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start observing `path`
///
/// `consumer` is called with the full path of every immediate child found
/// while the tree is discovered, on the calling thread, before this
/// returns. Degradation notices raised during discovery are delivered on
/// the calling thread as well.
pub fn observe_with(
    path: &Path,
    options: ObserveOptions,
    delivery: Delivery,
    consumer: &mut dyn FnMut(&Path),
) -> Result<Observation, ObserveError> {
    let root = path.to_path_buf();
    let kind = corefs::stat(&root, options.link).map_err(|e| ObserveError::from_io(e, &root))?;
    if !matches!(kind, FileKind::Directory | FileKind::File) {
        return Err(ObserveError::InvalidArgument(root));
    }

    let mut dispatcher = Dispatcher::new(delivery, options.quick_notify_first_event, Instant::now());

    if corefs::is_procfs(&root) {
        info!("Not observing {}: procfs does not report changes", root.display());
        return Ok(Observation::closed(
            root,
            CloseReason::Unsupported("procfs".to_string()),
            false,
        ));
    }

    let watch_limit = options.watch_limit.map(|limit| limit.saturating_add(1));
    let setup = Instance::open(options.trackers.clone(), watch_limit)
        .and_then(|instance| Waker::new().map(|waker| (instance, waker)));
    let (instance, waker) = match setup {
        Ok(setup) => setup,
        Err(err) => {
            warn!("Cannot observe {}: {}", root.display(), err);
            dispatcher.incomplete(&err);
            return Ok(Observation::closed(root, CloseReason::Failed(err.to_string()), true));
        }
    };

    let mut tree = WatchedTree::new(root.clone(), instance);
    let notices = match discovery::discover(&mut tree, options.link, kind, consumer) {
        Ok(notices) => notices,
        Err(failure) => {
            tree.release();
            return match failure {
                DiscoveryFailure::RootWatch(err) => {
                    warn!("Cannot watch {}: {}", root.display(), err);
                    dispatcher.incomplete(&err);
                    Ok(Observation::closed(root, CloseReason::Failed(err.to_string()), true))
                }
                DiscoveryFailure::RootVanished => {
                    debug!("{} vanished during discovery", root.display());
                    Ok(Observation::closed(root, CloseReason::RootGone, false))
                }
                DiscoveryFailure::Listing(err) => Err(err),
            };
        }
    };

    let state = Arc::new(ObservationState::new(waker));
    state.set_watched(tree.watched_directories());
    for notice in &notices {
        state.mark_incomplete();
        dispatcher.incomplete(notice);
    }

    let reader = Reader {
        tree,
        dispatcher,
        state: state.clone(),
    };
    let handle = thread::Builder::new()
        .name("dirwatch-reader".to_string())
        .spawn(move || reader.run())
        .map_err(|e| ObserveError::Io {
            path: root.clone(),
            source: e,
        });

    match handle {
        Ok(handle) => {
            debug!("Observing {}", root.display());
            Ok(Observation {
                root,
                state,
                reader: Some(handle),
            })
        }
        Err(err) => {
            warn!("Cannot start reader for {}: {}", root.display(), err);
            state.close_with(CloseReason::Failed(err.to_string()));
            Ok(Observation {
                root,
                state,
                reader: None,
            })
        }
    }
}

/// Owns the watched tree for the lifetime of the reader thread
struct Reader {
    tree: WatchedTree,
    dispatcher: Dispatcher,
    state: Arc<ObservationState>,
}

impl Reader {
    fn run(mut self) {
        let state = self.state.clone();
        let Some(waker) = state.waker() else {
            return;
        };

        loop {
            if state.is_closed() {
                break;
            }

            let timeout = self.dispatcher.timeout(Instant::now());
            match poll_readiness(self.tree.instance(), waker, timeout) {
                Ok(Readiness::Woken) => break,
                Ok(Readiness::Timeout) => {}
                Ok(Readiness::Events) => {
                    if self.drain().is_break() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("Observation of {} failed: {}", self.tree.root().display(), err);
                    self.tree.release();
                    self.state.close_with(CloseReason::Failed(err.to_string()));
                    break;
                }
            }

            self.dispatcher.tick(Instant::now());
        }

        self.tree.release();
    }

    /// Handle everything currently queued
    fn drain(&mut self) -> ControlFlow<()> {
        let events = match self.tree.read_events() {
            Ok(events) => events,
            Err(err) => {
                warn!("Failed to read events for {}: {}", self.tree.root().display(), err);
                self.tree.release();
                self.state.close_with(CloseReason::Failed(err.to_string()));
                return ControlFlow::Break(());
            }
        };

        for raw in events {
            if self.state.is_closed() {
                return ControlFlow::Break(());
            }
            if let Some(translation) = translate(self.tree.registry(), raw) {
                if self.handle(translation).is_break() {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn handle(&mut self, translation: Translation) -> ControlFlow<()> {
        let now = Instant::now();

        if translation.root_lost() {
            return self.root_gone(now);
        }

        match &translation.transition {
            Transition::Overflow => {
                let notice = ObserveError::ResourceExhausted(format!(
                    "event queue overflow under {}",
                    self.tree.root().display()
                ));
                warn!("{}", notice);
                self.notice(&notice);
                return ControlFlow::Continue(());
            }
            Transition::Ignored => {
                if let Some(path) = self.tree.watch_released(translation.wd) {
                    debug!("Watch on {:?} released by the kernel", path);
                }
                self.state.set_watched(self.tree.watched_directories());
                return ControlFlow::Continue(());
            }
            _ => {}
        }

        if let Some(change) = translation.directory_change() {
            match change {
                DirectoryChange::Appeared(rel) => {
                    if let Err(notice) = self.tree.directory_appeared(&rel) {
                        self.notice(&notice);
                    }
                }
                DirectoryChange::Vanished(rel) => self.tree.directory_vanished(&rel),
            }
            self.state.set_watched(self.tree.watched_directories());
        }

        if let Some((event, child)) = translation.domain_event() {
            self.dispatcher.event(event, child.as_deref(), now);
        }
        ControlFlow::Continue(())
    }

    fn notice(&mut self, cause: &ObserveError) {
        self.state.mark_incomplete();
        self.dispatcher.incomplete(cause);
    }

    /// The root was deleted, moved or unmounted: tear down, then tell the client
    fn root_gone(&mut self, now: Instant) -> ControlFlow<()> {
        info!("{} is gone, closing observation", self.tree.root().display());
        self.tree.release();
        self.state.close_with(CloseReason::RootGone);
        self.state.set_watched(0);
        self.dispatcher.event(Event::Delete, None, now);
        self.dispatcher.flush(now);
        ControlFlow::Break(())
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.tree.release();
        self.state.set_watched(0);
        let reason = if thread::panicking() {
            CloseReason::Failed("observer callback panicked".to_string())
        } else {
            CloseReason::Failed("reader stopped".to_string())
        };
        self.state.close_with(reason);
    }
}

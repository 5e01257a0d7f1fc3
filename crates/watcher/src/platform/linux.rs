//! inotify binding
//!
//! Resource-tracking wrapper over `nix::sys::inotify`, plus an eventfd used
//! to interrupt a reader blocked in `poll`. Errno values are translated
//! into `ObserveError`.

use crate::error::ObserveError;
use crate::tracker::Trackers;
use ahash::AHashSet;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use nix::sys::inotify::{InitFlags, Inotify, InotifyEvent};
use std::ffi::OsString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub use nix::sys::inotify::{AddWatchFlags, WatchDescriptor};

/// Mask for the observed root
pub const ROOT_MASK: AddWatchFlags = AddWatchFlags::IN_ATTRIB
    .union(AddWatchFlags::IN_CREATE)
    .union(AddWatchFlags::IN_DELETE)
    .union(AddWatchFlags::IN_DELETE_SELF)
    .union(AddWatchFlags::IN_MODIFY)
    .union(AddWatchFlags::IN_MOVE_SELF)
    .union(AddWatchFlags::IN_MOVED_FROM)
    .union(AddWatchFlags::IN_MOVED_TO);

/// Mask for directories below the root
///
/// Only the events that change the directory's listing, which is what
/// updates the directory's own attributes as seen from the root.
pub const CHILD_DIR_MASK: AddWatchFlags = AddWatchFlags::IN_DONT_FOLLOW
    .union(AddWatchFlags::IN_ONLYDIR)
    .union(AddWatchFlags::IN_CREATE)
    .union(AddWatchFlags::IN_DELETE)
    .union(AddWatchFlags::IN_MOVED_FROM)
    .union(AddWatchFlags::IN_MOVED_TO);

/// One decoded inotify record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub wd: WatchDescriptor,
    pub mask: AddWatchFlags,
    pub cookie: u32,
    /// Entry name inside the watched directory, `None` for events on the watched inode itself
    pub name: Option<OsString>,
}

impl From<InotifyEvent> for RawEvent {
    fn from(event: InotifyEvent) -> Self {
        Self {
            wd: event.wd,
            mask: event.mask,
            cookie: event.cookie,
            name: event.name.filter(|name| !name.is_empty()),
        }
    }
}

/// One inotify instance
///
/// Tracks the descriptors it handed out so that `close` can release every
/// one of them, whatever path led there. Closing is idempotent and also
/// happens on drop.
pub struct Instance {
    inotify: Option<Inotify>,
    raw_fd: RawFd,
    live: AHashSet<WatchDescriptor>,
    watch_limit: Option<usize>,
    trackers: Trackers,
}

impl Instance {
    /// Open a non-blocking instance
    ///
    /// `watch_limit` caps the number of live descriptors; past it `add_watch`
    /// fails the way the kernel does when `max_user_watches` is reached.
    pub fn open(trackers: Trackers, watch_limit: Option<usize>) -> Result<Self, ObserveError> {
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)
            .map_err(|errno| setup_error("inotify_init", errno))?;
        let raw_fd = inotify.as_fd().as_raw_fd();

        debug!("inotify instance opened (fd={})", raw_fd);
        trackers.notify(|t| t.on_init(raw_fd));

        Ok(Self {
            inotify: Some(inotify),
            raw_fd,
            live: AHashSet::new(),
            watch_limit,
            trackers,
        })
    }

    /// Watch `path` with `mask`
    ///
    /// Watching an inode that is already watched hands back its existing
    /// descriptor, and never counts against the watch limit.
    pub fn add_watch(
        &mut self,
        path: &Path,
        mask: AddWatchFlags,
    ) -> Result<WatchDescriptor, ObserveError> {
        let inotify = self
            .inotify
            .as_ref()
            .ok_or_else(|| ObserveError::from_errno(Errno::EBADF, path))?;

        let wd = loop {
            match inotify.add_watch(path, mask) {
                Ok(wd) => break wd,
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(errno) => return Err(ObserveError::from_errno(errno, path)),
            }
        };

        let at_limit = self
            .watch_limit
            .is_some_and(|limit| self.live.len() >= limit);
        if at_limit && !self.live.contains(&wd) {
            if let Err(errno) = inotify.rm_watch(wd) {
                warn!("Failed to undo watch over the limit ({:?}): {}", wd, errno);
            }
            return Err(ObserveError::from_errno(Errno::ENOSPC, path));
        }

        self.live.insert(wd);
        trace!("watch added (fd={}, wd={:?}, path={})", self.raw_fd, wd, path.display());
        let fd = self.raw_fd;
        self.trackers.notify(|t| t.on_watch_added(fd, path, mask, wd));
        Ok(wd)
    }

    /// Stop watching `wd`
    ///
    /// `InvalidDescriptor` means the kernel already dropped the watch; the
    /// descriptor is released either way.
    pub fn remove_watch(&mut self, wd: WatchDescriptor) -> Result<(), ObserveError> {
        let inotify = self
            .inotify
            .as_ref()
            .ok_or(ObserveError::InvalidDescriptor(wd))?;

        let result = loop {
            match inotify.rm_watch(wd) {
                Ok(()) => break Ok(()),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(Errno::EINVAL) => break Err(ObserveError::InvalidDescriptor(wd)),
                Err(errno) => break Err(io_error(errno)),
            }
        };

        if !matches!(result, Err(ObserveError::Io { .. })) {
            self.watch_released(wd);
        }
        result
    }

    /// Record that the kernel released `wd` on its own (`IN_IGNORED`)
    pub fn watch_released(&mut self, wd: WatchDescriptor) {
        if self.live.remove(&wd) {
            trace!("watch released (fd={}, wd={:?})", self.raw_fd, wd);
            let fd = self.raw_fd;
            self.trackers.notify(|t| t.on_watch_removed(fd, wd));
        }
    }

    /// Drain whatever is queued, without blocking
    pub fn read_events(&self) -> Result<Vec<RawEvent>, ObserveError> {
        let inotify = self.inotify.as_ref().ok_or_else(|| io_error(Errno::EBADF))?;

        loop {
            match inotify.read_events() {
                Ok(events) => return Ok(events.into_iter().map(RawEvent::from).collect()),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(Vec::new()),
                Err(errno) => return Err(io_error(errno)),
            }
        }
    }

    /// Release every live watch, then the instance itself
    pub fn close(&mut self) {
        let Some(inotify) = self.inotify.take() else {
            return;
        };
        let fd = self.raw_fd;

        for wd in self.live.drain().collect::<Vec<_>>() {
            match inotify.rm_watch(wd) {
                Ok(()) | Err(Errno::EINVAL) => {}
                Err(errno) => {
                    warn!("Failed to remove watch on close (fd={}, wd={:?}): {}", fd, wd, errno)
                }
            }
            self.trackers.notify(|t| t.on_watch_removed(fd, wd));
        }

        drop(inotify);
        debug!("inotify instance closed (fd={})", fd);
        self.trackers.notify(|t| t.on_close(fd));
    }

    pub fn is_closed(&self) -> bool {
        self.inotify.is_none()
    }

    /// Number of descriptors currently held
    pub fn live_watches(&self) -> usize {
        self.live.len()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("fd", &self.raw_fd)
            .field("closed", &self.is_closed())
            .field("live", &self.live.len())
            .finish()
    }
}

fn setup_error(call: &str, errno: Errno) -> ObserveError {
    match errno {
        Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM => {
            ObserveError::ResourceExhausted(format!("{}: {}", call, errno.desc()))
        }
        other => io_error(other),
    }
}

fn io_error(errno: Errno) -> ObserveError {
    ObserveError::Io {
        path: PathBuf::new(),
        source: io::Error::from(errno),
    }
}

/// Wakes a reader blocked in `poll_readiness`
pub struct Waker {
    fd: EventFd,
}

impl Waker {
    pub fn new() -> Result<Self, ObserveError> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(|errno| setup_error("eventfd", errno))?;
        Ok(Self { fd })
    }

    pub fn wake(&self) {
        // EAGAIN means the counter is already saturated, which still wakes the reader.
        match self.fd.write(1) {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(errno) => warn!("Failed to wake observation reader: {}", errno),
        }
    }
}

impl std::fmt::Debug for Waker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waker")
            .field("fd", &self.fd.as_fd().as_raw_fd())
            .finish()
    }
}

/// Outcome of waiting on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Events can be read from the instance
    Events,
    /// The waker fired
    Woken,
    /// The timeout elapsed first
    Timeout,
}

/// Block until `instance` has events, `waker` fires, or `timeout` elapses
///
/// `None` waits indefinitely. The waker takes precedence over pending events.
pub fn poll_readiness(
    instance: &Instance,
    waker: &Waker,
    timeout: Option<Duration>,
) -> Result<Readiness, ObserveError> {
    let Some(inotify) = instance.inotify.as_ref() else {
        return Ok(Readiness::Woken);
    };

    let mut fds = [
        PollFd::new(inotify.as_fd(), PollFlags::POLLIN),
        PollFd::new(waker.fd.as_fd(), PollFlags::POLLIN),
    ];
    let millis = timeout.map(timeout_millis);

    loop {
        let timeout = millis.map_or(PollTimeout::NONE, PollTimeout::from);
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(Readiness::Timeout),
            Ok(_) => {
                let woken = fds[1].revents().is_some_and(|revents| !revents.is_empty());
                if woken {
                    return Ok(Readiness::Woken);
                }
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents.contains(PollFlags::POLLIN) {
                    return Ok(Readiness::Events);
                }
                return Err(ObserveError::Io {
                    path: PathBuf::new(),
                    source: io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        format!("inotify descriptor not pollable ({:?})", revents),
                    ),
                });
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(io_error(errno)),
        }
    }
}

/// Round up to whole milliseconds so a short wait never becomes a busy loop
///
/// Waits past `u16::MAX` milliseconds are cut short; the reader simply
/// polls again.
fn timeout_millis(timeout: Duration) -> u16 {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    u16::try_from(millis).unwrap_or(u16::MAX)
}

/// Distinct live descriptors, for tests that need real ones
#[cfg(test)]
pub(crate) fn test_descriptors(count: usize) -> Vec<WatchDescriptor> {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let mut instance = Instance::open(Trackers::new(), None).unwrap();
    (0..count)
        .map(|i| {
            let dir = temp_dir.path().join(i.to_string());
            std::fs::create_dir(&dir).unwrap();
            instance.add_watch(&dir, CHILD_DIR_MASK).unwrap()
        })
        .collect()
}

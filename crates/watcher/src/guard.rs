//! Observation state shared between the handle and its reader thread
//!
//! The first close wins: whatever closes the observation first (the
//! client, root loss, a failure, a panicking callback) fixes its reason.

use crate::error::CloseReason;
use crate::platform::Waker;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct ObservationState {
    closed: AtomicBool,
    incomplete: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    watched: AtomicUsize,
    waker: Option<Waker>,
}

impl ObservationState {
    pub fn new(waker: Waker) -> Self {
        Self {
            closed: AtomicBool::new(false),
            incomplete: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            watched: AtomicUsize::new(0),
            waker: Some(waker),
        }
    }

    /// State of an observation that never got a reader
    pub fn closed(reason: CloseReason, incomplete: bool) -> Self {
        Self {
            closed: AtomicBool::new(true),
            incomplete: AtomicBool::new(incomplete),
            close_reason: Mutex::new(Some(reason)),
            watched: AtomicUsize::new(0),
            waker: None,
        }
    }

    /// Mark closed with `reason`; `false` if it already was
    pub fn close_with(&self, reason: CloseReason) -> bool {
        let mut current = self.close_reason.lock();
        if current.is_some() {
            return false;
        }
        debug!("Observation closed: {:?}", reason);
        *current = Some(reason);
        self.closed.store(true, Ordering::Release);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    pub fn mark_incomplete(&self) {
        self.incomplete.store(true, Ordering::Release);
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete.load(Ordering::Acquire)
    }

    pub fn set_watched(&self, count: usize) {
        self.watched.store(count, Ordering::Release);
    }

    pub fn watched(&self) -> usize {
        self.watched.load(Ordering::Acquire)
    }

    pub fn waker(&self) -> Option<&Waker> {
        self.waker.as_ref()
    }

    /// Interrupt the reader if it is blocked
    pub fn wake(&self) {
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }
}

//! Event delivery and batching
//!
//! Translated events reach the client through a `Dispatcher`, either one
//! by one or coalesced into batches. Batching keeps only the latest event
//! per child name and delivers on a fixed-delay tick driven by the reader
//! loop, so a batch observer is never called concurrently with itself.

use crate::error::ObserveError;
use crate::{BatchObserver, Event, Observer};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::time::{Duration, Instant};

/// Shortest batch interval accepted; zero would spin the reader
pub const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(1);

/// How an observation hands events to the client
pub enum Delivery {
    /// Every event as it is translated
    Immediate(Box<dyn Observer>),
    /// Coalesced per child name, at most once per `interval`
    Batched {
        observer: Box<dyn BatchObserver>,
        interval: Duration,
    },
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delivery::Immediate(_) => f.write_str("Immediate"),
            Delivery::Batched { interval, .. } => {
                f.debug_struct("Batched").field("interval", interval).finish()
            }
        }
    }
}

/// Pending changes since the last delivery
///
/// Later events replace earlier ones for the same name, so a delete
/// followed by a re-create nets out as `Create`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchState {
    self_changed: bool,
    children: HashMap<OsString, Event>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` for `child`, or for the observed path itself when `None`
    pub fn record(&mut self, event: Event, child: Option<&OsStr>) {
        match child {
            None => self.self_changed = true,
            Some(name) => {
                self.children.insert(name.to_os_string(), event);
            }
        }
    }

    pub fn self_changed(&self) -> bool {
        self.self_changed
    }

    pub fn get(&self, child: &OsStr) -> Option<Event> {
        self.children.get(child).copied()
    }

    pub fn is_empty(&self) -> bool {
        !self.self_changed && self.children.is_empty()
    }

    /// Hand out what accumulated and start over; `None` when nothing did
    pub fn take(&mut self) -> Option<(bool, HashMap<OsString, Event>)> {
        if self.is_empty() {
            return None;
        }
        let self_changed = std::mem::take(&mut self.self_changed);
        Some((self_changed, std::mem::take(&mut self.children)))
    }
}

struct BatchNotifier {
    observer: Box<dyn BatchObserver>,
    state: BatchState,
    interval: Duration,
    next_tick: Instant,
    quick_notify_first_event: bool,
    last_run: Option<Instant>,
}

impl BatchNotifier {
    fn run(&mut self, now: Instant) {
        self.last_run = Some(now);
        if let Some((self_changed, children)) = self.state.take() {
            self.observer.on_latest_events(self_changed, children);
        }
    }
}

enum Mode {
    Immediate(Box<dyn Observer>),
    Batched(BatchNotifier),
}

/// Routes events and degradation notices to the client
pub(crate) struct Dispatcher {
    mode: Mode,
}

impl Dispatcher {
    /// `quick_notify_first_event` lets the first event after a quiet
    /// interval go out right away instead of waiting for the next tick.
    pub fn new(delivery: Delivery, quick_notify_first_event: bool, now: Instant) -> Self {
        let mode = match delivery {
            Delivery::Immediate(observer) => Mode::Immediate(observer),
            Delivery::Batched { observer, interval } => {
                let interval = interval.max(MIN_BATCH_INTERVAL);
                Mode::Batched(BatchNotifier {
                    observer,
                    state: BatchState::new(),
                    interval,
                    next_tick: now + interval,
                    quick_notify_first_event,
                    last_run: None,
                })
            }
        };
        Self { mode }
    }

    pub fn event(&mut self, event: Event, child: Option<&OsStr>, now: Instant) {
        match &mut self.mode {
            Mode::Immediate(observer) => observer.on_event(event, child),
            Mode::Batched(batch) => {
                batch.state.record(event, child);
                if batch.quick_notify_first_event {
                    let quiet = batch
                        .last_run
                        .map_or(true, |last| now.duration_since(last) > batch.interval);
                    if quiet {
                        batch.run(now);
                    }
                }
            }
        }
    }

    pub fn incomplete(&mut self, cause: &ObserveError) {
        match &mut self.mode {
            Mode::Immediate(observer) => observer.on_incomplete_observation(cause),
            Mode::Batched(batch) => batch.observer.on_incomplete_observation(cause),
        }
    }

    /// How long the reader may block before the next tick is due
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        match &self.mode {
            Mode::Immediate(_) => None,
            Mode::Batched(batch) => Some(batch.next_tick.saturating_duration_since(now)),
        }
    }

    /// Deliver the pending batch if its tick is due, then schedule the next one
    pub fn tick(&mut self, now: Instant) {
        if let Mode::Batched(batch) = &mut self.mode {
            if now >= batch.next_tick {
                batch.run(now);
                batch.next_tick = now + batch.interval;
            }
        }
    }

    /// Deliver whatever is pending right away
    pub fn flush(&mut self, now: Instant) {
        if let Mode::Batched(batch) = &mut self.mode {
            batch.run(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Batches = Arc<Mutex<Vec<(bool, HashMap<OsString, Event>)>>>;

    struct Recorder(Batches);

    impl BatchObserver for Recorder {
        fn on_latest_events(&mut self, self_changed: bool, children: HashMap<OsString, Event>) {
            self.0.lock().push((self_changed, children));
        }

        fn on_incomplete_observation(&mut self, _cause: &ObserveError) {}
    }

    fn batched(interval: Duration, quick: bool, now: Instant) -> (Dispatcher, Batches) {
        let batches = Batches::default();
        let delivery = Delivery::Batched {
            observer: Box::new(Recorder(batches.clone())),
            interval,
        };
        (Dispatcher::new(delivery, quick, now), batches)
    }

    #[test]
    fn test_latest_event_wins() {
        let mut state = BatchState::new();
        state.record(Event::Delete, Some(OsStr::new("a")));
        state.record(Event::Create, Some(OsStr::new("a")));
        state.record(Event::Modify, Some(OsStr::new("b")));
        state.record(Event::Modify, Some(OsStr::new("b")));

        assert_eq!(state.get(OsStr::new("a")), Some(Event::Create));
        assert_eq!(state.get(OsStr::new("b")), Some(Event::Modify));
        assert!(!state.self_changed());

        let (self_changed, children) = state.take().unwrap();
        assert!(!self_changed);
        assert_eq!(children.len(), 2);
        assert!(state.take().is_none());
    }

    #[test]
    fn test_self_change() {
        let mut state = BatchState::new();
        state.record(Event::Modify, None);
        assert_eq!(state.take(), Some((true, HashMap::new())));
    }

    #[test]
    fn test_tick_delivers_once_per_interval() {
        let start = Instant::now();
        let interval = Duration::from_millis(50);
        let (mut dispatcher, batches) = batched(interval, false, start);

        dispatcher.event(Event::Create, Some(OsStr::new("a")), start);
        dispatcher.tick(start + Duration::from_millis(10));
        assert!(batches.lock().is_empty());
        assert_eq!(
            dispatcher.timeout(start + Duration::from_millis(10)),
            Some(Duration::from_millis(40))
        );

        dispatcher.tick(start + interval);
        assert_eq!(batches.lock().len(), 1);
        assert_eq!(batches.lock()[0].1.get(OsStr::new("a")), Some(&Event::Create));
    }

    #[test]
    fn test_empty_tick_is_suppressed() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);
        let (mut dispatcher, batches) = batched(interval, false, start);

        dispatcher.tick(start + interval);
        dispatcher.tick(start + interval * 3);

        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_quick_notify_first_event() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        let (mut dispatcher, batches) = batched(interval, true, start);

        dispatcher.event(Event::Create, Some(OsStr::new("a")), start);
        assert_eq!(batches.lock().len(), 1);

        // inside the interval: waits for the tick
        dispatcher.event(Event::Modify, Some(OsStr::new("a")), start + Duration::from_millis(10));
        assert_eq!(batches.lock().len(), 1);

        dispatcher.tick(start + interval);
        assert_eq!(batches.lock().len(), 2);
    }

    #[test]
    fn test_flush_delivers_pending() {
        let start = Instant::now();
        let (mut dispatcher, batches) = batched(Duration::from_secs(60), false, start);

        dispatcher.event(Event::Delete, None, start);
        dispatcher.flush(start);

        assert_eq!(batches.lock().as_slice(), &[(true, HashMap::new())]);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let start = Instant::now();
        let (dispatcher, _batches) = batched(Duration::ZERO, false, start);
        assert_eq!(dispatcher.timeout(start), Some(MIN_BATCH_INTERVAL));
    }
}

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{age_between, fmt_stamp};
use crate::emit::{Emitter, StreamDumper};

// === Operation === //

/// Capability contract the tracker requires of a concrete operation. The
/// tracker invokes these hooks but never constructs concrete ops.
pub trait Operation: Send + Sync {
    /// Short human description of the operation.
    fn describe(&self) -> String;

    /// Writes op-specific fields into an already-open `type_data` section.
    fn dump_type_data(&self, f: &mut dyn Emitter);

    /// Whether this op matches a set of filter strings. An empty set
    /// matches everything.
    fn filter_match(&self, filters: &[String]) -> bool {
        if filters.is_empty() {
            return true;
        }
        let desc = self.describe();
        filters.iter().any(|needle| desc.contains(needle.as_str()))
    }

    /// Invoked after an event was appended to the log.
    fn on_event(&self, _label: &str) {}

    /// Invoked exactly once after removal from the live registry, before
    /// any history insertion.
    fn on_unregistered(&self) {}
}

// === TrackedOp === //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpState {
    /// Partially constructed; not yet observable, events are ignored.
    Uninitialized = 0,
    Live = 1,
    History = 2,
}

impl OpState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Live,
            _ => Self::History,
        }
    }
}

/// One entry of an op's event log.
#[derive(Debug, Clone)]
pub struct Event {
    pub stamp: SystemTime,
    pub label: String,
}

/// Tracker-side handle around a concrete [`Operation`]: identity,
/// timestamps, the append-only event log and the warning backoff state.
pub struct TrackedOp {
    inner: Box<dyn Operation>,
    initiated_at: SystemTime,
    seq: AtomicU64,
    state: AtomicU8,
    completed_at: OnceCell<SystemTime>,
    warn_interval_multiplier: AtomicU32,
    events: Mutex<Vec<Event>>,
    // `describe` may be expensive; computed at most once.
    desc: OnceCell<String>,
}

impl fmt::Debug for TrackedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedOp")
            .field("seq", &self.seq())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TrackedOp {
    pub fn new(inner: Box<dyn Operation>, initiated_at: SystemTime) -> Self {
        Self {
            inner,
            initiated_at,
            seq: AtomicU64::new(0),
            state: AtomicU8::new(OpState::Uninitialized as u8),
            completed_at: OnceCell::new(),
            warn_interval_multiplier: AtomicU32::new(1),
            events: Mutex::new(Vec::new()),
            desc: OnceCell::new(),
        }
    }

    /// Sequence number assigned at registration; zero beforehand.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    pub fn initiated_at(&self) -> SystemTime {
        self.initiated_at
    }

    pub fn state(&self) -> OpState {
        OpState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn completed_at(&self) -> Option<SystemTime> {
        self.completed_at.get().copied()
    }

    pub fn age(&self, now: SystemTime) -> Duration {
        age_between(self.initiated_at, now)
    }

    /// Live ops report their current age; completed ops report the frozen
    /// completion duration.
    pub fn duration(&self, now: SystemTime) -> Duration {
        match self.completed_at.get() {
            Some(&done) => age_between(self.initiated_at, done),
            None => self.age(now),
        }
    }

    pub fn description(&self) -> &str {
        self.desc.get_or_init(|| self.inner.describe())
    }

    /// Copy of the most recent event label, if any.
    pub fn current(&self) -> Option<String> {
        self.events.lock().last().map(|ev| ev.label.clone())
    }

    /// Most recent event label, or the lifecycle placeholder when nothing
    /// has been marked yet.
    pub fn state_string(&self) -> String {
        self.current().unwrap_or_else(|| "initiated".to_owned())
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn warn_interval_multiplier(&self) -> u32 {
        self.warn_interval_multiplier.load(Ordering::Relaxed)
    }

    pub(crate) fn double_warn_interval(&self) {
        // Atomic read-modify-write keeps backoff monotonic even if more
        // than one health thread sweeps concurrently.
        let _ = self
            .warn_interval_multiplier
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |m| {
                Some(m.saturating_mul(2))
            });
    }

    /// Appends `(stamp, label)` to the event log. Ignored while the handle
    /// is still being constructed.
    pub fn mark_event(&self, label: &str, stamp: SystemTime) {
        if self.state() == OpState::Uninitialized {
            return;
        }

        self.events.lock().push(Event {
            stamp,
            label: label.to_owned(),
        });
        self.inner.on_event(label);
        debug!("op seq {} event {:?}", self.seq(), label);
    }

    pub fn matches_filter(&self, filters: &[String]) -> bool {
        self.inner.filter_match(filters)
    }

    pub(crate) fn activate(&self, seq: u64) {
        self.seq.store(seq, Ordering::Relaxed);
        self.state.store(OpState::Live as u8, Ordering::Release);
    }

    pub(crate) fn complete(&self, now: SystemTime) {
        // First write wins; each op is unregistered once.
        let _ = self.completed_at.set(now);
        self.state.store(OpState::History as u8, Ordering::Release);
    }

    pub(crate) fn notify_unregistered(&self) {
        self.inner.on_unregistered();
    }

    pub fn dump(&self, now: SystemTime, f: &mut dyn Emitter) {
        f.dump_string("description", self.description());
        let _ = write!(
            StreamDumper::new(f, "initiated_at"),
            "{}",
            fmt_stamp(self.initiated_at)
        );
        f.dump_float("age", self.age(now).as_secs_f64());
        f.dump_float("duration", self.duration(now).as_secs_f64());
        f.open_object("type_data");
        self.inner.dump_type_data(f);
        f.close_section();
    }
}

// === Tests === //

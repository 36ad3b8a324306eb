//! Bounded history of completed ops, indexed both by arrival time and by
//! duration, plus the slow-op sub-history. All three maps hold shared
//! handles to the same ops; composite `(key, seq)` keys disambiguate
//! duplicates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::clock::age_between;
use crate::config::TrackerConfig;
use crate::emit::Emitter;
use crate::op::TrackedOp;

// === OpHistory === //

type ArrivalKey = (SystemTime, u64);
type DurationKey = (Duration, u64);

#[derive(Default)]
struct Inner {
    by_arrival: BTreeMap<ArrivalKey, Arc<TrackedOp>>,
    by_duration: BTreeMap<DurationKey, Arc<TrackedOp>>,
    slow: BTreeMap<ArrivalKey, Arc<TrackedOp>>,
    shutdown: bool,
}

pub(crate) struct OpHistory {
    inner: Mutex<Inner>,
}

impl OpHistory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Records a completed op. Dropped silently once the history has shut
    /// down.
    pub fn insert(&self, now: SystemTime, op: Arc<TrackedOp>, config: &TrackerConfig) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return;
        }

        let seq = op.seq();
        let arrival = (op.initiated_at(), seq);
        let duration = op.duration(now);

        if duration >= config.slow_threshold() {
            inner.slow.insert(arrival, op.clone());
        }
        inner.by_duration.insert((duration, seq), op.clone());
        inner.by_arrival.insert(arrival, op);

        Self::evict(&mut inner, now, config);
    }

    fn evict(inner: &mut Inner, now: SystemTime, config: &TrackerConfig) {
        // Ops that arrived too long ago fall out of the main history. The
        // slow sub-history is deliberately untouched here.
        let horizon = config.history_duration();
        loop {
            let (initiated_at, seq, duration) = match inner.by_arrival.first_key_value() {
                Some((&(initiated_at, seq), op))
                    if age_between(initiated_at, now) > horizon =>
                {
                    (initiated_at, seq, op.duration(now))
                }
                _ => break,
            };
            inner.by_arrival.remove(&(initiated_at, seq));
            inner.by_duration.remove(&(duration, seq));
        }

        // Size sweep: the fastest completions go first, keeping the slowest
        // (diagnostically interesting) ones.
        while inner.by_duration.len() > config.history_size() {
            let Some(((_, seq), op)) = inner.by_duration.pop_first() else {
                break;
            };
            inner.by_arrival.remove(&(op.initiated_at(), seq));
        }

        // The slow sub-history is trimmed by arrival only, so slow entries
        // may outlive their main-history counterparts.
        while inner.slow.len() > config.slow_history_size() {
            inner.slow.pop_first();
        }
    }

    pub fn dump(
        &self,
        now: SystemTime,
        f: &mut dyn Emitter,
        filters: &[String],
        config: &TrackerConfig,
    ) {
        let mut inner = self.inner.lock();
        Self::evict(&mut inner, now, config);

        f.open_object("op_history");
        f.dump_int("size", config.history_size() as i64);
        f.dump_int("duration", config.history_duration().as_secs() as i64);
        f.open_array("ops");
        for op in inner.by_arrival.values() {
            if !op.matches_filter(filters) {
                continue;
            }
            f.open_object("op");
            op.dump(now, f);
            f.close_section();
        }
        f.close_section();
        f.close_section();
    }

    /// Like `dump`, but slowest completions first.
    pub fn dump_by_duration(
        &self,
        now: SystemTime,
        f: &mut dyn Emitter,
        filters: &[String],
        config: &TrackerConfig,
    ) {
        let mut inner = self.inner.lock();
        Self::evict(&mut inner, now, config);

        f.open_object("op_history");
        f.dump_int("size", config.history_size() as i64);
        f.dump_int("duration", config.history_duration().as_secs() as i64);
        f.open_array("ops");
        let snapshot: Vec<&Arc<TrackedOp>> = inner
            .by_duration
            .values()
            .filter(|op| op.matches_filter(filters))
            .collect();
        for op in snapshot.iter().rev() {
            f.open_object("op");
            op.dump(now, f);
            f.close_section();
        }
        f.close_section();
        f.close_section();
    }

    pub fn dump_slow(
        &self,
        now: SystemTime,
        f: &mut dyn Emitter,
        filters: &[String],
        config: &TrackerConfig,
    ) {
        let mut inner = self.inner.lock();
        Self::evict(&mut inner, now, config);

        // Section and field casing kept as external consumers know it.
        f.open_object("OpHistory slow ops");
        f.dump_int("num to keep", config.slow_history_size() as i64);
        f.dump_int("threshold to keep", config.slow_threshold().as_secs() as i64);
        f.open_array("Ops");
        for op in inner.slow.values() {
            if !op.matches_filter(filters) {
                continue;
            }
            f.open_object("Op");
            op.dump(now, f);
            f.close_section();
        }
        f.close_section();
        f.close_section();
    }

    /// Clears everything; later inserts are dropped.
    pub fn on_shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.by_arrival.clear();
        inner.by_duration.clear();
        inner.slow.clear();
    }

    #[cfg(test)]
    fn lens(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (
            inner.by_arrival.len(),
            inner.by_duration.len(),
            inner.slow.len(),
        )
    }

    #[cfg(test)]
    fn duration_secs(&self) -> Vec<u64> {
        let inner = self.inner.lock();
        inner
            .by_duration
            .keys()
            .map(|&(duration, _)| duration.as_secs())
            .collect()
    }

    #[cfg(test)]
    fn slow_duration_secs(&self, now: SystemTime) -> Vec<u64> {
        let inner = self.inner.lock();
        inner
            .slow
            .values()
            .map(|op| op.duration(now).as_secs())
            .collect()
    }
}

// === Tests === //

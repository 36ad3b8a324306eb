use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::clock::{age_between, Clock};
use crate::config::TrackerConfig;
use crate::emit::Emitter;
use crate::histogram::Pow2Histogram;
use crate::history::OpHistory;
use crate::op::{Operation, TrackedOp};
use crate::registry::{LiveRegistry, Visit};
use crate::slow::{self, SlowOpReport};

// === OpTracker === //

/// Facade over the live registry and the completed-op history.
///
/// Every public operation holds the lifecycle lock shared; teardown takes
/// it exclusive, so no observation can race destruction.
pub struct OpTracker {
    lifecycle: RwLock<()>,
    registry: LiveRegistry,
    history: OpHistory,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for OpTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpTracker")
            .field("num_shards", &self.config.num_shards())
            .finish_non_exhaustive()
    }
}

impl OpTracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            lifecycle: RwLock::new(()),
            registry: LiveRegistry::new(config.num_shards()),
            history: OpHistory::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Builds an op handle stamped with the tracker clock. The handle is
    /// not observable until registered.
    pub fn create(&self, inner: Box<dyn Operation>) -> Arc<TrackedOp> {
        Arc::new(TrackedOp::new(inner, self.clock.now()))
    }

    /// Admits an op into the live registry. Returns false when tracking is
    /// disabled; the op is then never observed and the caller keeps sole
    /// ownership.
    pub fn register_inflight(&self, op: &Arc<TrackedOp>) -> bool {
        let _guard = self.lifecycle.read();
        if !self.config.tracking_enabled() {
            return false;
        }
        self.registry.register(op);
        true
    }

    /// Releases an op from the live registry and, when tracking is
    /// enabled, freezes its duration and records it in the history.
    pub fn unregister_inflight(&self, op: Arc<TrackedOp>) {
        let _guard = self.lifecycle.read();
        self.registry.unregister(&op);
        op.notify_unregistered();

        if self.config.tracking_enabled() {
            let now = self.clock.now();
            op.complete(now);
            self.history.insert(now, op, &self.config);
        }
        // Tracking off: the handle drops here and the op dies with the
        // caller's last clone.
    }

    pub fn dump_ops_in_flight(
        &self,
        f: &mut dyn Emitter,
        only_blocked: bool,
        filters: &[String],
    ) -> bool {
        let _guard = self.lifecycle.read();
        if !self.config.tracking_enabled() {
            return false;
        }
        self.registry.dump(
            self.clock.now(),
            f,
            only_blocked,
            filters,
            self.config.complaint_time(),
        );
        true
    }

    pub fn dump_historic_ops(
        &self,
        f: &mut dyn Emitter,
        by_duration: bool,
        filters: &[String],
    ) -> bool {
        let _guard = self.lifecycle.read();
        if !self.config.tracking_enabled() {
            return false;
        }
        let now = self.clock.now();
        if by_duration {
            self.history.dump_by_duration(now, f, filters, &self.config);
        } else {
            self.history.dump(now, f, filters, &self.config);
        }
        true
    }

    pub fn dump_historic_slow_ops(&self, f: &mut dyn Emitter, filters: &[String]) -> bool {
        let _guard = self.lifecycle.read();
        if !self.config.tracking_enabled() {
            return false;
        }
        self.history
            .dump_slow(self.clock.now(), f, filters, &self.config);
        true
    }

    /// Walks all live ops, provided there is at least one and the oldest
    /// has reached the complaint time. Returns the oldest age when the walk
    /// happened.
    pub fn visit_ops_in_flight(
        &self,
        visitor: impl FnMut(&Arc<TrackedOp>) -> Visit,
    ) -> Option<Duration> {
        let _guard = self.lifecycle.read();
        let oldest_age = self.oldest_blocked_age()?;
        self.registry.visit(visitor);
        Some(oldest_age)
    }

    /// Runs the slow-op sweep. `None` means there is nothing slow enough to
    /// report.
    pub fn check_ops_in_flight(&self) -> Option<SlowOpReport> {
        let _guard = self.lifecycle.read();
        let oldest_age = self.oldest_blocked_age()?;
        Some(slow::sweep(
            &self.registry,
            self.clock.now(),
            oldest_age,
            self.config.complaint_time(),
            self.config.log_threshold(),
        ))
    }

    pub fn get_age_ms_histogram(&self) -> Pow2Histogram {
        let _guard = self.lifecycle.read();
        self.registry.age_histogram(self.clock.now())
    }

    fn oldest_blocked_age(&self) -> Option<Duration> {
        let summary = self.registry.summarize();
        let oldest = summary.oldest?;
        let oldest_age = age_between(oldest, self.clock.now());
        if oldest_age < self.config.complaint_time() {
            return None;
        }
        Some(oldest_age)
    }
}

impl Drop for OpTracker {
    fn drop(&mut self) {
        let _guard = self.lifecycle.write();
        let in_flight = self.registry.summarize().total;
        assert!(
            in_flight == 0,
            "op tracker dropped with {in_flight} ops still in flight"
        );
        self.history.on_shutdown();
    }
}

// === Tests === //

//! Shared fixtures for the in-crate tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::emit::Emitter;
use crate::op::Operation;

// === FakeClock === //

/// Manually advanced clock for time-sensitive scenarios.
pub struct FakeClock {
    now: Mutex<SystemTime>,
}

impl FakeClock {
    pub fn at_secs(secs: u64) -> Self {
        Self {
            now: Mutex::new(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set_secs(&self, secs: u64) {
        *self.now.lock() = UNIX_EPOCH + Duration::from_secs(secs);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

// === TestOp === //

#[derive(Default)]
pub struct TestProbes {
    pub describe_calls: AtomicUsize,
    pub events: AtomicUsize,
    pub unregistered: AtomicUsize,
}

pub struct TestOp {
    name: String,
    probes: Arc<TestProbes>,
}

impl TestOp {
    pub fn boxed(name: &str) -> Box<Self> {
        Self::probed(name).0
    }

    pub fn probed(name: &str) -> (Box<Self>, Arc<TestProbes>) {
        let probes = Arc::new(TestProbes::default());
        let op = Box::new(Self {
            name: name.to_owned(),
            probes: probes.clone(),
        });
        (op, probes)
    }
}

impl Operation for TestOp {
    fn describe(&self) -> String {
        self.probes.describe_calls.fetch_add(1, Ordering::Relaxed);
        format!("test op {}", self.name)
    }

    fn dump_type_data(&self, f: &mut dyn Emitter) {
        f.dump_string("name", &self.name);
    }

    fn on_event(&self, _label: &str) {
        self.probes.events.fetch_add(1, Ordering::Relaxed);
    }

    fn on_unregistered(&self) {
        self.probes.unregistered.fetch_add(1, Ordering::Relaxed);
    }
}

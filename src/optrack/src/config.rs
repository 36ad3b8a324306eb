use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

// === Errors === //

#[derive(Debug, Clone, Error)]
#[error("op tracker needs at least one shard")]
#[non_exhaustive]
pub struct ZeroShardsError;

// === TrackerConfig === //

/// Tracker tuning knobs. The shard count is fixed at construction (pick it
/// to match expected producer parallelism); everything else may be adjusted
/// at runtime and takes effect on the next insert or dump.
#[derive(Debug)]
pub struct TrackerConfig {
    num_shards: usize,
    tracking_enabled: AtomicBool,
    complaint_time_ms: AtomicU64,
    log_threshold: AtomicU32,
    history_size: AtomicUsize,
    history_duration_ms: AtomicU64,
    slow_threshold_ms: AtomicU64,
    slow_history_size: AtomicUsize,
}

impl TrackerConfig {
    pub fn new(num_shards: usize) -> Result<Self, ZeroShardsError> {
        if num_shards == 0 {
            return Err(ZeroShardsError);
        }

        Ok(Self {
            num_shards,
            tracking_enabled: AtomicBool::new(true),
            complaint_time_ms: AtomicU64::new(30_000),
            log_threshold: AtomicU32::new(5),
            history_size: AtomicUsize::new(20),
            history_duration_ms: AtomicU64::new(600_000),
            slow_threshold_ms: AtomicU64::new(10_000),
            slow_history_size: AtomicUsize::new(20),
        })
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled.load(Ordering::Relaxed)
    }

    pub fn set_tracking(&self, enabled: bool) {
        self.tracking_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Minimum age before an in-flight op is considered slow.
    pub fn complaint_time(&self) -> Duration {
        Duration::from_millis(self.complaint_time_ms.load(Ordering::Relaxed))
    }

    pub fn set_complaint_time(&self, value: Duration) {
        self.complaint_time_ms
            .store(value.as_millis() as u64, Ordering::Relaxed);
    }

    /// Maximum number of warning lines per health check.
    pub fn log_threshold(&self) -> u32 {
        self.log_threshold.load(Ordering::Relaxed)
    }

    pub fn set_log_threshold(&self, value: u32) {
        self.log_threshold.store(value, Ordering::Relaxed);
    }

    pub fn history_size(&self) -> usize {
        self.history_size.load(Ordering::Relaxed)
    }

    pub fn set_history_size(&self, value: usize) {
        self.history_size.store(value, Ordering::Relaxed);
    }

    pub fn history_duration(&self) -> Duration {
        Duration::from_millis(self.history_duration_ms.load(Ordering::Relaxed))
    }

    pub fn set_history_duration(&self, value: Duration) {
        self.history_duration_ms
            .store(value.as_millis() as u64, Ordering::Relaxed);
    }

    /// Completed ops at least this slow enter the slow sub-history.
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms.load(Ordering::Relaxed))
    }

    pub fn set_slow_threshold(&self, value: Duration) {
        self.slow_threshold_ms
            .store(value.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn slow_history_size(&self) -> usize {
        self.slow_history_size.load(Ordering::Relaxed)
    }

    pub fn set_slow_history_size(&self, value: usize) {
        self.slow_history_size.store(value, Ordering::Relaxed);
    }
}

// === Tests === //

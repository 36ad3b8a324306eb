use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::clock::fmt_stamp;
use crate::op::TrackedOp;
use crate::registry::{LiveRegistry, Visit};

// === SlowOpReport === //

/// Result of a slow-op sweep over the live registry.
#[derive(Debug, Clone)]
pub struct SlowOpReport {
    /// Live ops older than the complaint time.
    pub slow_count: usize,
    /// How many of those produced a warning line this sweep.
    pub warned_count: usize,
    /// Age of the oldest live op.
    pub oldest_age: Duration,
    /// One-line human summary.
    pub summary: String,
    /// One formatted line per warned op.
    pub warnings: Vec<String>,
}

// === Sweep === //

/// Walks the live ops and reports everything older than `complaint_time`.
///
/// Each op carries its own warn-interval multiplier: an op is re-reported
/// only once `complaint_time * multiplier` has elapsed since it arrived,
/// and the multiplier doubles on every emitted warning. A persistently
/// stuck op therefore keeps getting counted but backs off exponentially in
/// the log.
pub(crate) fn sweep(
    registry: &LiveRegistry,
    now: SystemTime,
    oldest_age: Duration,
    complaint_time: Duration,
    log_threshold: u32,
) -> SlowOpReport {
    let too_old = now - complaint_time;
    let mut slow_count = 0usize;
    let mut warnings = Vec::new();

    registry.visit(|op| {
        if op.initiated_at() >= too_old {
            // Within-shard registration order: the rest of this shard is
            // younger still.
            return Visit::Stop;
        }
        slow_count += 1;

        if warnings.len() as u32 >= log_threshold {
            // Keep counting, stop printing.
            return Visit::Continue;
        }

        let next_complaint =
            op.initiated_at() + complaint_time * op.warn_interval_multiplier();
        if next_complaint >= now {
            // Still inside this op's backoff window.
            return Visit::Continue;
        }

        op.double_warn_interval();
        let line = warning_line(op, now);
        warn!("{line}");
        warnings.push(line);
        Visit::Continue
    });

    let warned_count = warnings.len();
    let summary = format!(
        "{} slow requests, {} included below; oldest blocked for > {:.3} secs",
        slow_count,
        warned_count,
        oldest_age.as_secs_f64(),
    );

    SlowOpReport {
        slow_count,
        warned_count,
        oldest_age,
        summary,
        warnings,
    }
}

fn warning_line(op: &TrackedOp, now: SystemTime) -> String {
    format!(
        "slow request {:.6} seconds old, received at {}: {} currently {}",
        op.age(now).as_secs_f64(),
        fmt_stamp(op.initiated_at()),
        op.description(),
        op.state_string(),
    )
}

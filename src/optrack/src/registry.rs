use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::trace;

use crate::emit::Emitter;
use crate::histogram::Pow2Histogram;
use crate::op::TrackedOp;

// === Visitation === //

/// Visitor verdict. `Stop` ends traversal of the current shard only; later
/// shards are still visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VisitSummary {
    /// Live ops across all shards.
    pub total: usize,
    /// Earliest `initiated_at` across all shard fronts.
    pub oldest: Option<SystemTime>,
}

// === Shard === //

// Keyed by seq: each shard receives a strictly increasing subsequence, so
// ascending-key order is registration order and the front is the oldest op
// in the shard.
struct Shard {
    ops: Mutex<BTreeMap<u64, Arc<TrackedOp>>>,
}

// === LiveRegistry === //

/// Sharded set of in-flight ops. An op's shard is derived from its seq
/// alone, so registration and release on different shards never contend.
pub(crate) struct LiveRegistry {
    shards: Box<[Shard]>,
    next_seq: AtomicU64,
}

impl LiveRegistry {
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards)
            .map(|_| Shard {
                ops: Mutex::new(BTreeMap::new()),
            })
            .collect();

        Self {
            shards,
            next_seq: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, seq: u64) -> &Shard {
        &self.shards[(seq % self.shards.len() as u64) as usize]
    }

    /// Admits an op: assigns the next seq, stamps the handle live and
    /// appends it to its shard.
    pub fn register(&self, op: &Arc<TrackedOp>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        // Stamp before insertion so the op is fully initialized by the time
        // any visitor can reach it.
        op.activate(seq);
        self.shard_for(seq).ops.lock().insert(seq, op.clone());
        trace!("registered op seq {seq}");
        seq
    }

    /// Releases an op from its shard. Releasing an op that was never
    /// admitted is a caller bug.
    pub fn unregister(&self, op: &TrackedOp) -> bool {
        let seq = op.seq();
        let removed = self.shard_for(seq).ops.lock().remove(&seq);
        debug_assert!(
            removed.is_some(),
            "op seq {seq} unregistered but not in the live registry"
        );
        trace!("unregistered op seq {seq}");
        removed.is_some()
    }

    /// Per-shard count and oldest-front scan. Each shard lock is held only
    /// while that shard is inspected.
    pub fn summarize(&self) -> VisitSummary {
        let mut summary = VisitSummary::default();
        for shard in self.shards.iter() {
            let ops = shard.ops.lock();
            summary.total += ops.len();
            if let Some((_, front)) = ops.iter().next() {
                let initiated_at = front.initiated_at();
                summary.oldest = Some(match summary.oldest {
                    Some(oldest) if oldest <= initiated_at => oldest,
                    _ => initiated_at,
                });
            }
        }
        summary
    }

    /// Walks shards in index order, each front-to-back under its own lock.
    pub fn visit(&self, mut visitor: impl FnMut(&Arc<TrackedOp>) -> Visit) {
        for shard in self.shards.iter() {
            let ops = shard.ops.lock();
            for op in ops.values() {
                if let Visit::Stop = visitor(op) {
                    break;
                }
            }
        }
    }

    pub fn dump(
        &self,
        now: SystemTime,
        f: &mut dyn Emitter,
        only_blocked: bool,
        filters: &[String],
        complaint_time: Duration,
    ) {
        f.open_object("ops_in_flight");
        f.open_array("ops");

        let mut emitted: i64 = 0;
        for shard in self.shards.iter() {
            let ops = shard.ops.lock();
            for op in ops.values() {
                if only_blocked && op.age(now) <= complaint_time {
                    // Everything after this op in the shard is younger
                    // still.
                    break;
                }
                if !op.matches_filter(filters) {
                    continue;
                }
                f.open_object("op");
                op.dump(now, f);
                f.close_section();
                emitted += 1;
            }
        }

        f.close_section();
        if only_blocked {
            f.dump_float("complaint_time", complaint_time.as_secs_f64());
            f.dump_int("num_blocked_ops", emitted);
        } else {
            f.dump_int("num_ops", emitted);
        }
        f.close_section();
    }

    /// Power-of-two histogram of live op ages in milliseconds.
    pub fn age_histogram(&self, now: SystemTime) -> Pow2Histogram {
        let mut histogram = Pow2Histogram::new();
        self.visit(|op| {
            histogram.add(op.age(now).as_millis() as u64);
            Visit::Continue
        });
        histogram
    }

    #[cfg(test)]
    pub fn shard_seqs(&self) -> Vec<Vec<u64>> {
        self.shards
            .iter()
            .map(|shard| shard.ops.lock().keys().copied().collect())
            .collect()
    }
}

// === Tests === //

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::emit::JsonEmitter;
    use crate::op::OpState;
    use crate::testing::TestOp;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn live_op(name: &str, initiated_secs: u64) -> Arc<TrackedOp> {
        Arc::new(TrackedOp::new(TestOp::boxed(name), at(initiated_secs)))
    }

    #[test]
    fn register_assigns_dense_seqs_and_shards() {
        let registry = LiveRegistry::new(4);
        let ops: Vec<_> = (0..100).map(|i| live_op(&format!("op{i}"), i)).collect();
        for op in &ops {
            registry.register(op);
        }

        let shards = registry.shard_seqs();
        for seqs in &shards {
            assert_eq!(seqs.len(), 25);
            // FIFO within the shard: seqs ascend, and so do arrival times.
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }

        for op in &ops {
            assert_eq!(op.state(), OpState::Live);
            let shard = (op.seq() % 4) as usize;
            assert!(shards[shard].contains(&op.seq()));
        }

        for op in ops {
            registry.unregister(&op);
        }
        assert_eq!(registry.summarize().total, 0);
    }

    #[test]
    fn unregister_leaves_no_trace() {
        let registry = LiveRegistry::new(2);
        let a = live_op("a", 0);
        let b = live_op("b", 1);
        registry.register(&a);
        registry.register(&b);

        registry.unregister(&a);
        let remaining: Vec<u64> = registry.shard_seqs().into_iter().flatten().collect();
        assert_eq!(remaining, vec![b.seq()]);
        registry.unregister(&b);
    }

    #[test]
    fn summarize_finds_true_oldest_across_shards() {
        let registry = LiveRegistry::new(3);
        // Registration order deliberately does not follow arrival order, so
        // the oldest op does not sit in shard 0.
        let ops = [live_op("a", 50), live_op("b", 10), live_op("c", 30)];
        for op in &ops {
            registry.register(op);
        }

        let summary = registry.summarize();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.oldest, Some(at(10)));

        for op in ops {
            registry.unregister(&op);
        }
    }

    #[test]
    fn visit_stop_ends_only_the_current_shard() {
        let registry = LiveRegistry::new(2);
        let ops: Vec<_> = (0..6).map(|i| live_op(&format!("op{i}"), i)).collect();
        for op in &ops {
            registry.register(op);
        }

        // Stop each shard after its first op: exactly one op per shard.
        let mut seen_shards = Vec::new();
        registry.visit(|op| {
            seen_shards.push(op.seq() % 2);
            Visit::Stop
        });
        assert_eq!(seen_shards, vec![0, 1]);

        for op in ops {
            registry.unregister(&op);
        }
    }

    #[test]
    fn only_blocked_dump_stops_at_first_young_op() {
        let registry = LiveRegistry::new(1);
        let ops = [live_op("a", 0), live_op("b", 50), live_op("c", 70)];
        for op in &ops {
            registry.register(op);
        }

        let mut f = JsonEmitter::new();
        registry.dump(at(80), &mut f, true, &[], Duration::from_secs(30));
        let value = f.into_value();

        let dumped = &value["ops_in_flight"];
        assert_eq!(dumped["num_blocked_ops"], 1);
        assert_eq!(dumped["complaint_time"], 30.0);
        let emitted = dumped["ops"].as_array().unwrap();
        // b (age 30) is not past the complaint time and ends the shard
        // walk, so c (age 10) is never reached.
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0]["description"], "test op a");

        for op in ops {
            registry.unregister(&op);
        }
    }

    #[test]
    fn full_dump_skips_filtered_ops_without_stopping() {
        let registry = LiveRegistry::new(1);
        let ops = [
            live_op("read.pg1", 0),
            live_op("write.pg2", 1),
            live_op("read.pg3", 2),
        ];
        for op in &ops {
            registry.register(op);
        }

        let mut f = JsonEmitter::new();
        registry.dump(
            at(10),
            &mut f,
            false,
            &["read".to_owned()],
            Duration::from_secs(30),
        );
        let value = f.into_value();

        assert_eq!(value["ops_in_flight"]["num_ops"], 2);
        let emitted = value["ops_in_flight"]["ops"].as_array().unwrap();
        assert_eq!(emitted[0]["description"], "test op read.pg1");
        assert_eq!(emitted[1]["description"], "test op read.pg3");

        for op in ops {
            registry.unregister(&op);
        }
    }

    #[test]
    fn age_histogram_buckets_live_ages() {
        let registry = LiveRegistry::new(2);
        // Ages at t=100: 100s, 70s, 3s.
        let ops = [live_op("a", 0), live_op("b", 30), live_op("c", 97)];
        for op in &ops {
            registry.register(op);
        }

        let histogram = registry.age_histogram(at(100));
        assert_eq!(histogram.total(), 3);
        // 100_000ms and 70_000ms share [65536..131072); 3000ms lands in
        // [2048..4096).
        assert_eq!(histogram.buckets()[17], 2);
        assert_eq!(histogram.buckets()[12], 1);

        for op in ops {
            registry.unregister(&op);
        }
    }

    #[test]
    fn concurrent_register_unregister_stays_consistent() {
        const THREADS: usize = 8;
        const OPS_PER_THREAD: usize = 64;

        let registry = LiveRegistry::new(4);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for t in 0..THREADS {
                let registry = &registry;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    for i in 0..OPS_PER_THREAD {
                        let op = live_op(&format!("op{t}.{i}"), 0);
                        registry.register(&op);
                        registry.unregister(&op);
                    }
                });
            }
        });

        assert_eq!(registry.summarize().total, 0);
        assert_eq!(
            registry.next_seq.load(Ordering::Relaxed),
            (THREADS * OPS_PER_THREAD) as u64
        );
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use optrack::{Emitter, JsonEmitter, OpTracker, Operation, TrackerConfig, WallClock};

struct IoRequest {
    object: String,
    bytes: u64,
}

impl Operation for IoRequest {
    fn describe(&self) -> String {
        format!("write {} ({} bytes)", self.object, self.bytes)
    }

    fn dump_type_data(&self, f: &mut dyn Emitter) {
        f.dump_string("object", &self.object);
        f.dump_int("bytes", self.bytes as i64);
    }
}

fn main() {
    let config = TrackerConfig::new(4).expect("shard count");
    config.set_complaint_time(Duration::from_millis(20));
    config.set_slow_threshold(Duration::from_millis(25));
    let tracker = OpTracker::new(config, Arc::new(WallClock::new()));

    thread::scope(|s| {
        for worker in 0..4u64 {
            let tracker = &tracker;
            s.spawn(move || {
                for i in 0..8 {
                    let op = tracker.create(Box::new(IoRequest {
                        object: format!("obj.{worker}.{i}"),
                        bytes: 4096,
                    }));
                    if tracker.register_inflight(&op) {
                        op.mark_event("queued", tracker.now());
                        thread::sleep(Duration::from_millis(5 + worker * 10));
                        op.mark_event("committed", tracker.now());
                        tracker.unregister_inflight(op);
                    }
                }
            });
        }

        let tracker = &tracker;
        s.spawn(move || {
            thread::sleep(Duration::from_millis(80));
            if let Some(report) = tracker.check_ops_in_flight() {
                eprintln!("{}", report.summary);
                for line in &report.warnings {
                    eprintln!("{line}");
                }
            }
        });
    });

    let mut f = JsonEmitter::new();
    tracker.dump_historic_ops(&mut f, true, &[]);
    tracker.dump_historic_slow_ops(&mut f, &[]);
    println!(
        "{}",
        serde_json::to_string_pretty(&f.into_value()).expect("render dump")
    );
}

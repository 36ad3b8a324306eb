use crate::emit::Emitter;

// === Pow2Histogram === //

/// Power-of-two histogram. Bucket 0 counts zeros; bucket `i` counts values
/// in `[2^(i-1), 2^i)`.
#[derive(Debug, Clone, Default)]
pub struct Pow2Histogram {
    buckets: Vec<u64>,
}

impl Pow2Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_for(value: u64) -> usize {
        (u64::BITS - value.leading_zeros()) as usize
    }

    pub fn add(&mut self, value: u64) {
        let idx = Self::bucket_for(value);
        if self.buckets.len() <= idx {
            self.buckets.resize(idx + 1, 0);
        }
        self.buckets[idx] += 1;
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Inclusive lower bound of bucket `i`.
    pub fn lower_bound(i: usize) -> u64 {
        if i == 0 {
            0
        } else {
            1 << (i - 1)
        }
    }

    /// Exclusive upper bound of bucket `i`.
    pub fn upper_bound(i: usize) -> u64 {
        1 << i
    }

    pub fn dump(&self, name: &str, f: &mut dyn Emitter) {
        f.open_array(name);
        for (i, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            f.open_object("bucket");
            f.dump_int("lower_bound", Self::lower_bound(i) as i64);
            f.dump_int("upper_bound", Self::upper_bound(i) as i64);
            f.dump_int("count", count as i64);
            f.close_section();
        }
        f.close_section();
    }
}

// === Tests === //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        let mut h = Pow2Histogram::new();
        for v in [0, 1, 2, 3, 4, 7, 8, 1023, 1024] {
            h.add(v);
        }

        // 0 | 1 | 2..3 | 4..7 | 8 | ... | 512..1023 | 1024
        assert_eq!(h.buckets()[0], 1);
        assert_eq!(h.buckets()[1], 1);
        assert_eq!(h.buckets()[2], 2);
        assert_eq!(h.buckets()[3], 2);
        assert_eq!(h.buckets()[4], 1);
        assert_eq!(h.buckets()[10], 1);
        assert_eq!(h.buckets()[11], 1);
        assert_eq!(h.total(), 9);
    }

    #[test]
    fn dump_skips_empty_buckets() {
        use serde_json::json;

        use crate::emit::JsonEmitter;

        let mut h = Pow2Histogram::new();
        h.add(1);
        h.add(300);
        h.add(300);

        let mut f = JsonEmitter::new();
        h.dump("ages", &mut f);
        assert_eq!(
            f.into_value(),
            json!({
                "ages": [
                    { "lower_bound": 1, "upper_bound": 2, "count": 1 },
                    { "lower_bound": 256, "upper_bound": 512, "count": 2 },
                ]
            })
        );
    }

    #[test]
    fn bounds_cover_each_bucket() {
        for i in 1..16 {
            let lo = Pow2Histogram::lower_bound(i);
            let hi = Pow2Histogram::upper_bound(i);
            assert_eq!(Pow2Histogram::bucket_for(lo), i);
            assert_eq!(Pow2Histogram::bucket_for(hi - 1), i);
            assert_eq!(hi, lo * 2);
        }
    }
}

use std::time::{Duration, SystemTime};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

// === Clock === //

/// Wall-clock reader consumed by the tracker. Injected at construction so
/// time-sensitive behavior stays testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default)]
#[non_exhaustive]
pub struct WallClock;

impl WallClock {
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for WallClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

// === Stamp formatting === //

/// Renders a wall-clock stamp as RFC 3339 for dumps and warning lines.
pub fn fmt_stamp(stamp: SystemTime) -> String {
    match OffsetDateTime::from(stamp).format(&Rfc3339) {
        Ok(text) => text,
        Err(_) => format!("{stamp:?}"),
    }
}

/// Age of `earlier` as seen from `later`, zero if the clock went backwards.
pub fn age_between(earlier: SystemTime, later: SystemTime) -> Duration {
    later.duration_since(earlier).unwrap_or(Duration::ZERO)
}

// === Tests === //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_renders_epoch() {
        assert_eq!(fmt_stamp(SystemTime::UNIX_EPOCH), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn age_saturates_on_backwards_clock() {
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        assert_eq!(age_between(later, SystemTime::UNIX_EPOCH), Duration::ZERO);
        assert_eq!(
            age_between(SystemTime::UNIX_EPOCH, later),
            Duration::from_secs(10)
        );
    }
}

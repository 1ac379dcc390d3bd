//! Per-job event offsets.
//!
//! Offsets use the same shape as Redis stream ids (`<millis>-<seq>`) so the
//! in-memory and Redis logs hand out interchangeable resume points.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of an event in one job's log. Ordered by `(millis, seq)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EventOffset {
    millis: u64,
    seq: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid event offset: {0}")]
pub struct OffsetParseError(String);

impl EventOffset {
    /// Before every real offset; reading after it replays the whole log.
    pub const ZERO: EventOffset = EventOffset { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Next offset after `self` given the current wall clock.
    ///
    /// Same rule as Redis `XADD *`: use the clock when it moved forward,
    /// otherwise bump the sequence, so offsets stay strictly increasing even if
    /// the clock stalls or steps back.
    pub fn next(&self, now_millis: u64) -> EventOffset {
        if now_millis > self.millis {
            EventOffset::new(now_millis, 0)
        } else {
            EventOffset::new(self.millis, self.seq + 1)
        }
    }
}

impl core::fmt::Display for EventOffset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EventOffset {
    type Err = OffsetParseError;

    /// Accepts `<millis>-<seq>` or a bare `<millis>` (sequence 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let millis = ms.parse().map_err(|_| OffsetParseError(s.to_string()))?;
        let seq = seq.parse().map_err(|_| OffsetParseError(s.to_string()))?;
        Ok(Self { millis, seq })
    }
}

impl Serialize for EventOffset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventOffset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_redis_style_ids() {
        assert_eq!("1700000000000-3".parse::<EventOffset>().unwrap(), EventOffset::new(1_700_000_000_000, 3));
        assert_eq!("42".parse::<EventOffset>().unwrap(), EventOffset::new(42, 0));
        assert!("abc".parse::<EventOffset>().is_err());
        assert!("1-x".parse::<EventOffset>().is_err());
    }

    #[test]
    fn ordering_is_by_millis_then_seq() {
        assert!(EventOffset::new(1, 9) < EventOffset::new(2, 0));
        assert!(EventOffset::new(2, 0) < EventOffset::new(2, 1));
        assert!(EventOffset::ZERO < EventOffset::new(0, 1));
    }

    #[test]
    fn next_bumps_sequence_when_clock_stalls() {
        let a = EventOffset::new(100, 0);
        assert_eq!(a.next(100), EventOffset::new(100, 1));
        assert_eq!(a.next(50), EventOffset::new(100, 1));
        assert_eq!(a.next(101), EventOffset::new(101, 0));
    }

    proptest! {
        /// Property: offsets generated from any clock sequence strictly increase.
        #[test]
        fn generated_offsets_strictly_increase(clock in prop::collection::vec(0u64..50, 1..100)) {
            let mut last = EventOffset::ZERO;
            for now in clock {
                let next = last.next(now);
                prop_assert!(next > last);
                last = next;
            }
        }
    }
}

//! Statistics processing and output
// (c) 2024 Ross Younger

use human_repr::{HumanCount as _, HumanDuration as _, HumanThroughput as _};
use std::{fmt::Display, time::Duration};

use crate::transfer::TransferStats;

/// Human friendly output helper
#[derive(Debug, Clone, Copy)]
pub struct DataRate {
    /// Bytes per second; if None, we were unable to compute a rate.
    rate: Option<f64>,
}

impl DataRate {
    /// Standard constructor
    #[must_use]
    pub fn new(bytes: u64, time: Option<Duration>) -> Self {
        match time {
            None => Self { rate: None },
            Some(time) if time.is_zero() => Self { rate: None }, // divide by zero is not meaningful
            Some(time) => Self {
                #[allow(clippy::cast_precision_loss)]
                rate: Some((bytes as f64) / time.as_secs_f64()),
            },
        }
    }
    /// Accessor
    #[must_use]
    pub fn byte_rate(&self) -> Option<f64> {
        self.rate
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.byte_rate() {
            None => f.write_str("unknown"),
            Some(rate) => rate.human_throughput_bytes().fmt(f),
        }
    }
}

/// One-line summary of a completed transfer, e.g. `2.5kB in 30ms (83.3kB/s, 3 chunks)`
#[must_use]
pub fn summary(stats: &TransferStats) -> String {
    let rate = DataRate::new(stats.bytes, Some(stats.elapsed));
    format!(
        "{} in {} ({rate}, {} chunk{})",
        stats.bytes.human_count_bytes(),
        stats.elapsed.human_duration(),
        stats.chunks,
        if stats.chunks == 1 { "" } else { "s" },
    )
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::time::Duration;

    use assertables::assert_contains;
    use pretty_assertions::assert_eq;

    use super::{DataRate, summary};
    use crate::transfer::TransferStats;

    #[test]
    fn unknown() {
        let r = DataRate::new(1234, None);
        assert_eq!(format!("{r}"), "unknown");
        let r = DataRate::new(1234, Some(Duration::ZERO));
        assert_eq!(format!("{r}"), "unknown");
    }

    #[test]
    fn known() {
        let r = DataRate::new(1234, Some(Duration::from_secs(1)));
        assert_eq!(r.byte_rate(), Some(1234.0));
        assert_eq!(format!("{r}"), "1.2kB/s");
    }

    #[test]
    fn summary_line() {
        let stats = TransferStats {
            bytes: 2500,
            chunks: 3,
            elapsed: Duration::from_millis(500),
        };
        let s = summary(&stats);
        assert_contains!(s, "2.5kB");
        assert_contains!(s, "5kB/s");
        assert_contains!(s, "3 chunks");
    }
}

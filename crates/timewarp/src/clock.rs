// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::LogicalTime;
use crate::logical_time::duration_to_nanos;
use crate::state::Shared;

/// The logical clock of a [`TimeService`][crate::TimeService].
///
/// Logical time is real time shifted by a signed offset. The offset is shared by every
/// clone of the clock and by the [`TimerManager`][crate::TimerManager] of the same
/// service, so changing it through one handle is immediately visible through all others.
///
/// Changing the offset never touches the logical deadlines of pending timers. Only the real
/// delay until the earliest deadline is recomputed: moving the clock forward shortens the
/// remaining wait (possibly to zero, firing the timer right away), moving it back lengthens it.
///
/// Cloning a clock is inexpensive (just an `Arc` clone).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use timewarp::{AlarmControl, TimeService};
///
/// let control = AlarmControl::new();
/// let service = TimeService::builder().control(&control).build()?;
/// let clock = service.clock();
///
/// assert_eq!(clock.now().as_nanos(), 0);
///
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now().as_nanos(), 5_000_000_000);
///
/// clock.set_offset(-1);
/// assert_eq!(clock.now().as_nanos(), -1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Clock(Arc<Shared>);

impl Clock {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self(shared)
    }

    /// Returns the current logical time: real time plus the current offset.
    ///
    /// This is lock-free. A read racing with [`set_offset`][Self::set_offset] observes
    /// either the previous or the new offset.
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        self.0.now()
    }

    /// Returns the current logical time as [`SystemTime`].
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        self.now().to_system_time()
    }

    /// Returns the current offset in nanoseconds.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.0.offset()
    }

    /// Replaces the offset and reprograms the alarm for the earliest pending deadline.
    ///
    /// The offset is absolute: `set_offset(0)` returns the clock to real time.
    pub fn set_offset(&self, offset: i64) {
        let (previous, offset) = self.0.update_offset(|_| offset);
        debug!(previous, offset, "clock offset replaced");
    }

    /// Moves the clock forward by `duration`, saturating at the offset limits.
    pub fn advance(&self, duration: Duration) {
        let shift = duration_to_nanos(duration);
        let (previous, offset) = self.0.update_offset(|o| o.saturating_add(shift));
        debug!(previous, offset, "clock advanced");
    }

    /// Moves the clock back by `duration`, saturating at the offset limits.
    pub fn rewind(&self, duration: Duration) {
        let shift = duration_to_nanos(duration);
        let (previous, offset) = self.0.update_offset(|o| o.saturating_sub(shift));
        debug!(previous, offset, "clock rewound");
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Clock: Send, Sync, Clone);
    }

    #[test]
    fn now_follows_real_time_and_offset() {
        let harness = Harness::new();
        let clock = harness.clock();

        harness.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), LogicalTime::from_nanos(1_000_000_000));

        clock.set_offset(500);
        assert_eq!(clock.offset(), 500);
        assert_eq!(clock.now(), LogicalTime::from_nanos(1_000_000_500));
    }

    #[test]
    fn advance_and_rewind_are_relative() {
        let harness = Harness::new();
        let clock = harness.clock();

        clock.advance(Duration::from_secs(3));
        clock.rewind(Duration::from_secs(5));

        assert_eq!(clock.offset(), -2_000_000_000);
        assert_eq!(clock.now().as_nanos(), -2_000_000_000);
    }

    #[test]
    fn offset_saturates() {
        let harness = Harness::new();
        let clock = harness.clock();

        clock.set_offset(i64::MAX);
        clock.advance(Duration::MAX);
        assert_eq!(clock.offset(), i64::MAX);

        clock.set_offset(i64::MIN);
        clock.rewind(Duration::from_secs(1));
        assert_eq!(clock.offset(), i64::MIN);
    }

    #[test]
    fn clones_share_offset() {
        let harness = Harness::new();
        let clock = harness.clock();
        let clone = clock.clone();

        clone.set_offset(42);

        assert_eq!(clock.offset(), 42);
    }

    #[test]
    fn system_time_ok() {
        let harness = Harness::new();
        let clock = harness.clock();

        clock.set_offset(1_000_000_000);

        assert_eq!(clock.system_time(), SystemTime::UNIX_EPOCH + Duration::from_secs(1));
    }

    #[test]
    fn set_offset_shortens_real_wait() {
        let harness = Harness::new();
        let clock = harness.clock();
        let _timer = harness.timers().create_one_shot(Duration::from_secs(60));

        clock.set_offset(59_000_000_000);
        assert_eq!(harness.control.pending_delay(), Some(Duration::from_secs(1)));

        clock.set_offset(-10_000_000_000);
        assert_eq!(harness.control.pending_delay(), Some(Duration::from_secs(70)));

        assert_eq!(harness.control.max_outstanding(), 1);
    }

    #[test]
    fn set_offset_does_not_touch_deadlines() {
        let harness = Harness::new();
        let clock = harness.clock();
        let timers = harness.timers();
        let timer = timers.create_one_shot(Duration::from_secs(60));

        clock.set_offset(59_000_000_000);

        assert_eq!(timers.deadline(&timer), Some(LogicalTime::from_nanos(60_000_000_000)));
    }

    #[test]
    fn fast_forward_past_deadline_fires_immediately() {
        let harness = Harness::new();
        let timer = harness.timers().create_one_shot(Duration::from_secs(60));

        harness.clock().advance(Duration::from_secs(61));
        harness.drain();

        assert_eq!(timer.try_recv(), Some(LogicalTime::from_nanos(61_000_000_000)));
    }
}

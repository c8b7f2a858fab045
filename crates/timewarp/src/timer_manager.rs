// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::state::Shared;
use crate::timers::{TimerEntry, TimerId};
use crate::{LogicalTime, TimerHandle};

/// The shortest period of a periodic timer. Shorter periods are raised to this value.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Creates, reschedules and stops timers that follow the logical [`Clock`][crate::Clock].
///
/// Deadlines are logical: a timer created with a duration of 60 seconds fires when the
/// logical clock reaches the creation time plus 60 seconds, however the offset changes in
/// between. Timers with equal deadlines fire in creation order.
///
/// All operations are serialized by a single lock and finish in time bounded by the number
/// of pending timers. Cloning the manager is inexpensive (just an `Arc` clone).
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
/// let timers = service.timers();
///
/// let slow = timers.create_one_shot(Duration::from_secs(3));
/// let fast = timers.create_one_shot(Duration::from_secs(2));
///
/// control.advance(Duration::from_secs(2));
/// assert_eq!(fast.recv_blocking().map(|t| t.as_nanos()), Some(2_000_000_000));
///
/// // Push the slow timer out by another ten seconds.
/// assert!(timers.reset(&slow, Duration::from_secs(10), None));
/// assert_eq!(timers.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct TimerManager(Arc<Shared>);

impl TimerManager {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self(shared)
    }

    /// Creates a timer that fires once, `duration` after the current logical time.
    #[must_use]
    pub fn create_one_shot(&self, duration: Duration) -> TimerHandle {
        self.create(duration, Duration::ZERO)
    }

    /// Creates a timer that first fires `duration` after the current logical time and then
    /// every `period`.
    ///
    /// The deadline advances by exactly `period` from the previous deadline, not from the
    /// moment the tick was delivered, so the timer does not drift. Periods shorter than
    /// [`MIN_PERIOD`] are raised to it.
    #[must_use]
    pub fn create_periodic(&self, duration: Duration, period: Duration) -> TimerHandle {
        self.create(duration, period.max(MIN_PERIOD))
    }

    fn create(&self, duration: Duration, period: Duration) -> TimerHandle {
        let (ticks, receiver) = async_channel::bounded(1);
        let mut scheduler = self.0.lock();
        let id = scheduler.next_id();

        if scheduler.shut_down {
            drop(scheduler);
            drop(ticks);
            warn!(timer_id = id.get(), "timer created after shutdown will never fire");
            return TimerHandle::new(id, receiver, Weak::new());
        }

        let now = self.0.now();
        let deadline = now.saturating_add(duration);

        if scheduler.timers.insert(id, deadline, TimerEntry { period, ticks }) {
            self.0.rearm(&mut scheduler, now);
        }
        drop(scheduler);

        debug!(
            timer_id = id.get(),
            deadline = deadline.as_nanos(),
            period = ?period,
            "timer created"
        );

        TimerHandle::new(id, receiver, Arc::downgrade(&self.0))
    }

    /// Reschedules a pending timer to fire `duration` after the current logical time.
    ///
    /// `period` replaces the period of the timer when given: `Some(Duration::ZERO)` turns
    /// it into a one-shot timer, any other value makes it periodic (raised to
    /// [`MIN_PERIOD`] if shorter). `None` keeps the current period. The timer keeps its
    /// queue, so a tick that was delivered but not consumed yet stays available.
    ///
    /// Returns `false` and does nothing if the timer already fired (one-shot), was stopped
    /// or belongs to a different service.
    pub fn reset(&self, handle: &TimerHandle, duration: Duration, period: Option<Duration>) -> bool {
        if !handle.belongs_to(&self.0) {
            return false;
        }

        let id = handle.id();
        let mut scheduler = self.0.lock();

        let Some((mut entry, was_head)) = scheduler.timers.remove(id) else {
            drop(scheduler);
            debug!(timer_id = id.get(), "reset of an inactive timer ignored");
            return false;
        };

        if let Some(period) = period {
            entry.period = if period.is_zero() { Duration::ZERO } else { period.max(MIN_PERIOD) };
        }

        let now = self.0.now();
        let deadline = now.saturating_add(duration);
        let is_head = scheduler.timers.insert(id, deadline, entry);

        if was_head || is_head {
            self.0.rearm(&mut scheduler, now);
        }
        drop(scheduler);

        debug!(timer_id = id.get(), deadline = deadline.as_nanos(), "timer reset");
        true
    }

    /// Stops a pending timer. No further ticks are delivered and its queue closes.
    ///
    /// Returns `false` and does nothing if the timer already fired (one-shot), was stopped
    /// or belongs to a different service.
    pub fn stop(&self, handle: &TimerHandle) -> bool {
        if !handle.belongs_to(&self.0) {
            return false;
        }

        let stopped = Self::stop_id(&self.0, handle.id());
        if stopped {
            debug!(timer_id = handle.id().get(), "timer stopped");
        }

        stopped
    }

    pub(crate) fn stop_id(shared: &Shared, id: TimerId) -> bool {
        let mut scheduler = shared.lock();

        let Some((_entry, was_head)) = scheduler.timers.remove(id) else {
            return false;
        };

        if was_head {
            shared.rearm(&mut scheduler, shared.now());
        }

        true
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().timers.len()
    }

    /// Returns `true` if no timers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().timers.is_empty()
    }

    /// Returns the earliest logical deadline among the pending timers.
    #[must_use]
    pub fn next_deadline(&self) -> Option<LogicalTime> {
        self.0.lock().timers.next_deadline()
    }

    /// Returns the logical deadline at which a pending timer fires next.
    ///
    /// Returns `None` if the timer is no longer pending.
    #[must_use]
    pub fn deadline(&self, handle: &TimerHandle) -> Option<LogicalTime> {
        if !handle.belongs_to(&self.0) {
            return None;
        }

        self.0.lock().timers.deadline(handle.id())
    }

    /// Returns how many times the drain worker recovered from a fault.
    #[must_use]
    pub fn restart_count(&self) -> u64 {
        self.0.restart_count()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    const fn secs(secs: i64) -> LogicalTime {
        LogicalTime::from_nanos(secs * 1_000_000_000)
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(TimerManager: Send, Sync, Clone);
    }

    #[test]
    fn fires_in_deadline_order() {
        let harness = Harness::new();
        let timers = harness.timers();

        let a = timers.create_one_shot(Duration::from_secs(3));
        let b = timers.create_one_shot(Duration::from_secs(2));
        assert_eq!(timers.next_deadline(), Some(secs(2)));

        harness.advance(Duration::from_secs(2));
        assert_eq!(b.try_recv(), Some(secs(2)));
        assert_eq!(a.try_recv(), None);

        harness.advance(Duration::from_secs(1));
        assert_eq!(a.try_recv(), Some(secs(3)));
        assert!(timers.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_together() {
        let harness = Harness::new();
        let timers = harness.timers();

        let first = timers.create_one_shot(Duration::from_secs(1));
        let second = timers.create_one_shot(Duration::from_secs(1));

        harness.advance(Duration::from_secs(1));

        assert_eq!(first.try_recv(), Some(secs(1)));
        assert_eq!(second.try_recv(), Some(secs(1)));
    }

    #[test]
    fn zero_duration_fires_on_next_drain() {
        let harness = Harness::new();
        let timer = harness.timers().create_one_shot(Duration::ZERO);

        harness.drain();

        assert_eq!(timer.try_recv(), Some(secs(0)));
    }

    #[test]
    fn reset_before_deadline_moves_it() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_one_shot(Duration::from_secs(2));

        harness.advance(Duration::from_secs(1));
        assert!(timers.reset(&timer, Duration::from_secs(5), None));
        assert_eq!(timers.deadline(&timer), Some(secs(6)));

        harness.advance(Duration::from_secs(1));
        assert_eq!(timer.try_recv(), None);

        harness.advance(Duration::from_secs(4));
        assert_eq!(timer.try_recv(), Some(secs(6)));
    }

    #[test]
    fn reset_fired_one_shot_is_noop() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_one_shot(Duration::from_secs(1));

        harness.advance(Duration::from_secs(1));

        assert!(!timers.reset(&timer, Duration::from_secs(1), None));
        assert!(timers.is_empty());
    }

    #[test]
    fn reset_changes_period() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_one_shot(Duration::from_secs(1));

        assert!(timers.reset(&timer, Duration::from_secs(1), Some(Duration::from_secs(2))));

        harness.advance(Duration::from_secs(1));
        assert_eq!(timer.try_recv(), Some(secs(1)));
        assert_eq!(timers.deadline(&timer), Some(secs(3)));

        // Back to one-shot.
        assert!(timers.reset(&timer, Duration::from_secs(1), Some(Duration::ZERO)));
        harness.advance(Duration::from_secs(1));
        assert_eq!(timer.try_recv(), Some(secs(2)));
        assert!(timer.is_closed());
    }

    #[test]
    fn reset_keeps_queue() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_periodic(Duration::from_secs(1), Duration::from_secs(1));

        harness.advance(Duration::from_secs(1));
        assert!(timers.reset(&timer, Duration::from_secs(10), None));

        assert_eq!(timer.try_recv(), Some(secs(1)));
        assert!(!timer.is_closed());
    }

    #[test]
    fn stop_prevents_delivery() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_one_shot(Duration::from_secs(1));

        assert!(timers.stop(&timer));
        assert!(!timers.stop(&timer));
        assert!(!timers.reset(&timer, Duration::from_secs(1), None));

        harness.advance(Duration::from_secs(5));
        assert_eq!(timer.try_recv(), None);
        assert!(timer.is_closed());
        assert!(!harness.control.is_armed());
    }

    #[test]
    fn stop_head_rearms_to_next() {
        let harness = Harness::new();
        let timers = harness.timers();
        let head = timers.create_one_shot(Duration::from_secs(1));
        let _tail = timers.create_one_shot(Duration::from_secs(4));

        assert!(timers.stop(&head));

        assert_eq!(harness.control.pending_delay(), Some(Duration::from_secs(4)));
        assert_eq!(harness.control.max_outstanding(), 1);
    }

    #[test]
    fn periodic_is_drift_free() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_periodic(Duration::from_secs(1), Duration::from_secs(1));

        // Deliveries observed late still keep the deadline on the original grid.
        harness.advance(Duration::from_millis(1_300));
        assert_eq!(timer.try_recv(), Some(LogicalTime::from_nanos(1_300_000_000)));
        assert_eq!(timers.deadline(&timer), Some(secs(2)));

        harness.advance(Duration::from_millis(700));
        assert_eq!(timer.try_recv(), Some(secs(2)));
        assert_eq!(timers.deadline(&timer), Some(secs(3)));
    }

    #[test]
    fn periodic_skips_missed_periods() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_periodic(Duration::from_secs(1), Duration::from_secs(1));

        harness.clock().advance(Duration::from_millis(10_500));
        harness.drain();

        assert_eq!(timer.try_recv(), Some(LogicalTime::from_nanos(10_500_000_000)));
        assert_eq!(timer.try_recv(), None);
        assert_eq!(timers.deadline(&timer), Some(secs(11)));
    }

    #[test]
    fn short_period_is_raised() {
        let harness = Harness::new();
        let timers = harness.timers();
        let timer = timers.create_periodic(Duration::ZERO, Duration::from_nanos(1));

        harness.drain();

        assert!(timer.try_recv().is_some());
        assert_eq!(timers.deadline(&timer), Some(LogicalTime::from_nanos(1_000_000)));
    }

    #[test]
    fn latest_tick_only() {
        let harness = Harness::new();
        let timer = harness
            .timers()
            .create_periodic(Duration::from_secs(1), Duration::from_secs(1));

        harness.advance(Duration::from_secs(1));
        harness.advance(Duration::from_secs(1));

        // The second tick found the slot occupied and was dropped.
        assert_eq!(timer.try_recv(), Some(secs(1)));
        assert_eq!(timer.try_recv(), None);
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let harness = Harness::new();
        let other = Harness::new();
        let timer = other.timers().create_one_shot(Duration::from_secs(1));

        assert!(!harness.timers().reset(&timer, Duration::ZERO, None));
        assert!(!harness.timers().stop(&timer));
        assert_eq!(harness.timers().deadline(&timer), None);
        assert_eq!(other.timers().len(), 1);
    }

    #[test]
    fn at_most_one_alarm_outstanding() {
        let harness = Harness::new();
        let timers = harness.timers();
        let clock = harness.clock();

        let handles: Vec<_> = (1..=20)
            .map(|i| timers.create_one_shot(Duration::from_secs(21 - i)))
            .collect();

        for (i, handle) in handles.iter().enumerate().step_by(3) {
            timers.reset(handle, Duration::from_millis(100 * i as u64), None);
        }
        clock.advance(Duration::from_secs(3));
        for handle in handles.iter().step_by(4) {
            timers.stop(handle);
        }
        clock.rewind(Duration::from_secs(7));
        harness.advance(Duration::from_secs(30));

        assert!(timers.is_empty());
        assert!(harness.control.max_outstanding() <= 1);
        assert!(!harness.control.is_armed());
    }

    #[test]
    fn restart_count_starts_at_zero() {
        let harness = Harness::new();

        assert_eq!(harness.timers().restart_count(), 0);
    }
}

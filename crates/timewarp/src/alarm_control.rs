// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::LogicalTime;
use crate::logical_time::duration_to_nanos;
use crate::runtime::{Alarm, AlarmId, TimeSource, Wakeup};

/// Controls the flow of real time in tests.
///
/// `AlarmControl` is both a [`TimeSource`] and an [`Alarm`]. Real time only moves when
/// [`advance`][Self::advance] is called, and the pending alarm schedule fires as soon as
/// the advanced time reaches its delay. This makes timer scenarios deterministic without
/// having to wait for real time to pass.
///
/// `AlarmControl` is available when the `test-util` feature is enabled.
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
///
/// let timer = service.timers().create_one_shot(Duration::from_secs(60));
/// assert!(control.is_armed());
///
/// // A logical jump of 59 seconds leaves one second of real time to wait.
/// service.clock().set_offset(59_000_000_000);
/// assert_eq!(control.pending_delay(), Some(Duration::from_secs(1)));
///
/// control.advance(Duration::from_secs(1));
/// let fired_at = timer.recv_blocking().ok_or("timer closed")?;
/// assert_eq!(fired_at.as_nanos(), 60_000_000_000);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// # Production code and `AlarmControl`
///
/// Never enable the `test-util` feature in production code. Always ensure that the feature
/// is only enabled for `dev-dependencies`.
///
/// ```toml
/// timewarp = { version = "*", features = ["test-util"] }
/// ```
#[derive(Debug, Clone)]
pub struct AlarmControl {
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    // Wall time reported through `TimeSource`, in nanoseconds since the UNIX epoch.
    wall: i64,
    base: Instant,
    elapsed: Duration,
    last_id: u64,
    pending: Vec<Pending>,
    max_outstanding: usize,
    fired: usize,
}

#[derive(Debug)]
struct Pending {
    id: AlarmId,
    // Point on the `elapsed` axis at which the schedule fires.
    due: Duration,
    wakeup: Wakeup,
}

impl Default for AlarmControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmControl {
    /// Creates a control whose real time starts at the UNIX epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(SystemTime::UNIX_EPOCH)
    }

    /// Creates a control whose real time starts at the given system time.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::{Duration, SystemTime};
    ///
    /// use timewarp::AlarmControl;
    /// use timewarp::runtime::TimeSource;
    ///
    /// let control = AlarmControl::new_at(SystemTime::UNIX_EPOCH + Duration::from_secs(100));
    ///
    /// assert_eq!(control.now_nanos(), 100_000_000_000);
    /// ```
    #[must_use]
    pub fn new_at(time: SystemTime) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                wall: LogicalTime::from(time).as_nanos(),
                base: Instant::now(),
                elapsed: Duration::ZERO,
                last_id: 0,
                pending: Vec::new(),
                max_outstanding: 0,
                fired: 0,
            })),
        }
    }

    /// Manually advances real time by the specified number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Manually advances real time by the specified duration.
    ///
    /// Every alarm schedule whose delay has passed fires, in due order.
    pub fn advance(&self, duration: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.elapsed = state.elapsed.saturating_add(duration);
            state.wall = state.wall.saturating_add(duration_to_nanos(duration));

            let elapsed = state.elapsed;
            let (mut due, pending): (Vec<_>, Vec<_>) = state.pending.drain(..).partition(|p| p.due <= elapsed);
            state.pending = pending;
            state.fired += due.len();

            due.sort_by_key(|p| p.due);
            due
        };

        // Fire outside of the lock, a wake-up may immediately call back into the alarm.
        for pending in due {
            pending.wakeup.fire();
        }
    }

    /// Returns `true` if an alarm schedule is outstanding.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Returns the number of outstanding alarm schedules.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the highest number of alarm schedules that were ever outstanding at once.
    #[must_use]
    pub fn max_outstanding(&self) -> usize {
        self.state.lock().max_outstanding
    }

    /// Returns how many alarm schedules fired so far.
    #[must_use]
    pub fn fired(&self) -> usize {
        self.state.lock().fired
    }

    /// Returns the remaining real delay of the earliest outstanding schedule.
    #[must_use]
    pub fn pending_delay(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .map(|p| p.due.saturating_sub(state.elapsed))
            .min()
    }
}

impl State {
    fn schedule(&mut self, id: AlarmId, delay: Duration, wakeup: Wakeup) {
        if delay.is_zero() {
            self.fired += 1;
            wakeup.fire();
            return;
        }

        self.pending.push(Pending {
            id,
            due: self.elapsed.saturating_add(delay),
            wakeup,
        });
        self.max_outstanding = self.max_outstanding.max(self.pending.len());
    }

    fn take(&mut self, id: AlarmId) -> Option<Pending> {
        let index = self.pending.iter().position(|p| p.id == id)?;
        Some(self.pending.swap_remove(index))
    }
}

impl TimeSource for AlarmControl {
    fn now_nanos(&self) -> i64 {
        self.state.lock().wall
    }
}

impl Alarm for AlarmControl {
    fn read_monotonic(&self) -> Instant {
        let state = self.state.lock();
        state.base.checked_add(state.elapsed).unwrap_or(state.base)
    }

    fn arm(&self, delay: Duration, wakeup: Wakeup) -> AlarmId {
        let mut state = self.state.lock();
        state.last_id = state.last_id.wrapping_add(1);
        let id = AlarmId::new(state.last_id);

        state.schedule(id, delay, wakeup);

        id
    }

    fn cancel(&self, id: AlarmId) -> bool {
        self.state.lock().take(id).is_some()
    }

    fn reset(&self, id: AlarmId, delay: Duration) -> bool {
        let mut state = self.state.lock();

        match state.take(id) {
            Some(pending) => {
                state.schedule(id, delay, pending.wakeup);
                true
            }
            None => false,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(AlarmControl: Send, Sync, Clone, Default, Alarm, TimeSource);
    }

    #[test]
    fn advance_moves_wall_and_monotonic_time() {
        let control = AlarmControl::new();
        let start = control.read_monotonic();

        control.advance(Duration::from_secs(2));
        control.advance_millis(500);

        assert_eq!(control.now_nanos(), 2_500_000_000);
        assert_eq!(control.read_monotonic() - start, Duration::from_millis(2_500));
    }

    #[test]
    fn new_at_starts_at_system_time() {
        let control = AlarmControl::new_at(SystemTime::UNIX_EPOCH + Duration::from_secs(10));

        assert_eq!(control.now_nanos(), 10_000_000_000);
    }

    #[test]
    fn fires_once_delay_passed() {
        let control = AlarmControl::new();
        let (wakeup, signals) = Wakeup::pair();

        control.arm(Duration::from_secs(1), wakeup);
        assert!(control.is_armed());
        assert_eq!(control.pending_delay(), Some(Duration::from_secs(1)));

        control.advance(Duration::from_millis(999));
        assert!(signals.try_recv().is_err());
        assert_eq!(control.pending_delay(), Some(Duration::from_millis(1)));

        control.advance(Duration::from_millis(1));
        assert!(signals.try_recv().is_ok());
        assert!(!control.is_armed());
        assert_eq!(control.fired(), 1);
    }

    #[test]
    fn zero_delay_fires_immediately() {
        let control = AlarmControl::new();
        let (wakeup, signals) = Wakeup::pair();

        control.arm(Duration::ZERO, wakeup);

        assert!(signals.try_recv().is_ok());
        assert_eq!(control.outstanding(), 0);
        assert_eq!(control.max_outstanding(), 0);
    }

    #[test]
    fn reset_reprograms_and_rejects_fired() {
        let control = AlarmControl::new();
        let (wakeup, signals) = Wakeup::pair();

        let id = control.arm(Duration::from_secs(10), wakeup);
        assert!(control.reset(id, Duration::from_secs(1)));
        assert_eq!(control.outstanding(), 1);

        control.advance(Duration::from_secs(1));
        assert!(signals.try_recv().is_ok());

        assert!(!control.reset(id, Duration::from_secs(1)));
        assert!(!control.cancel(id));
    }

    #[test]
    fn reset_to_zero_fires() {
        let control = AlarmControl::new();
        let (wakeup, signals) = Wakeup::pair();

        let id = control.arm(Duration::from_secs(10), wakeup);

        assert!(control.reset(id, Duration::ZERO));
        assert!(signals.try_recv().is_ok());
        assert!(!control.is_armed());
    }

    #[test]
    fn cancel_removes_schedule() {
        let control = AlarmControl::new();
        let (wakeup, signals) = Wakeup::pair();

        let id = control.arm(Duration::from_secs(1), wakeup);
        assert!(control.cancel(id));

        control.advance(Duration::from_secs(5));
        assert!(signals.try_recv().is_err());
        assert_eq!(control.fired(), 0);
    }

    #[test]
    fn max_outstanding_tracks_peak() {
        let control = AlarmControl::new();
        let (wakeup, _signals) = Wakeup::pair();

        let first = control.arm(Duration::from_secs(1), wakeup.clone());
        let _second = control.arm(Duration::from_secs(2), wakeup);
        control.cancel(first);

        assert_eq!(control.outstanding(), 1);
        assert_eq!(control.max_outstanding(), 2);
        assert_eq!(control.pending_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn clones_share_state() {
        let control = AlarmControl::default();
        let clone = control.clone();

        clone.advance(Duration::from_nanos(42));

        assert_eq!(control.now_nanos(), 42);
    }
}

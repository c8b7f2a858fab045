// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Real-time collaborators that drive the scheduler.
//!
//! The scheduler never sleeps on its own. It reads real time through a [`TimeSource`] and
//! asks an [`Alarm`] to wake it once, after a real delay, when the earliest logical deadline
//! is due. At most one alarm schedule is outstanding at any moment regardless of how many
//! timers are registered; every change to the registry or to the clock offset reprograms
//! that single schedule.
//!
//! Built-in implementations:
//!
//! - [`SystemTimeSource`] - reads the operating system wall clock.
//! - [`ThreadAlarm`] - the default alarm, backed by a dedicated thread.
//! - [`TokioAlarm`] - an alarm backed by the Tokio timer (`tokio` feature).
//! - [`AlarmControl`][crate::AlarmControl] - a manually driven alarm and time source for
//!   tests (`test-util` feature).
//!
//! # Implementing an alarm
//!
//! An alarm must invoke [`Wakeup::fire`] once the real delay passed to [`Alarm::arm`] or
//! [`Alarm::reset`] has elapsed, unless the schedule was cancelled or reprogrammed first.
//! A zero delay means "as soon as possible". Firing must not block.
//!
//! ```
//! use std::time::{Duration, Instant};
//!
//! use timewarp::runtime::{Alarm, AlarmId, Wakeup};
//!
//! /// An alarm that fires immediately, regardless of the requested delay.
//! #[derive(Debug)]
//! struct Impatient;
//!
//! impl Alarm for Impatient {
//!     fn read_monotonic(&self) -> Instant {
//!         Instant::now()
//!     }
//!
//!     fn arm(&self, _delay: Duration, wakeup: Wakeup) -> AlarmId {
//!         wakeup.fire();
//!         AlarmId::new(0)
//!     }
//!
//!     fn cancel(&self, _id: AlarmId) -> bool {
//!         false
//!     }
//!
//!     fn reset(&self, _id: AlarmId, _delay: Duration) -> bool {
//!         // Already fired; the scheduler arms a new schedule instead.
//!         false
//!     }
//! }
//! ```

use std::fmt::Debug;
use std::time::{Duration, Instant, SystemTime};

use async_channel::{Receiver, Sender};

use crate::LogicalTime;

mod thread_alarm;
#[cfg(any(feature = "tokio", test))]
mod tokio_alarm;

pub use thread_alarm::ThreadAlarm;
#[cfg(any(feature = "tokio", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub use tokio_alarm::TokioAlarm;

/// Source of real wall-clock time.
pub trait TimeSource: Debug + Send + Sync + 'static {
    /// Returns the real time in nanoseconds since the UNIX epoch.
    fn now_nanos(&self) -> i64;
}

/// A single reprogrammable "fire once" wake-up primitive.
///
/// See the [module documentation](self) for the contract.
pub trait Alarm: Debug + Send + Sync + 'static {
    /// Reads the monotonic clock the alarm measures its delays with.
    fn read_monotonic(&self) -> Instant;

    /// Schedules `wakeup` to fire after `delay` of real time.
    fn arm(&self, delay: Duration, wakeup: Wakeup) -> AlarmId;

    /// Cancels the schedule. Returns `false` if it already fired or was cancelled.
    fn cancel(&self, id: AlarmId) -> bool;

    /// Reprograms an outstanding schedule to fire after `delay` from now.
    ///
    /// Returns `false` if the schedule already fired or was cancelled, in which case
    /// nothing is scheduled and the caller arms a new one.
    fn reset(&self, id: AlarmId, delay: Duration) -> bool;
}

/// Identifies one schedule of an [`Alarm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmId(u64);

impl AlarmId {
    /// Creates an alarm identifier. Alarms choose their own numbering.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Wakes the drain worker of a scheduler.
///
/// Signals do not accumulate: firing while a previous signal is still unprocessed has no
/// additional effect, because a single drain cycle delivers everything that is due.
#[derive(Debug, Clone)]
pub struct Wakeup(Sender<()>);

impl Wakeup {
    pub(crate) fn pair() -> (Self, Receiver<()>) {
        let (sender, receiver) = async_channel::bounded(1);
        (Self(sender), receiver)
    }

    /// Signals the scheduler that its earliest deadline may be due. Never blocks.
    pub fn fire(&self) {
        _ = self.0.try_send(());
    }

    pub(crate) fn close(&self) {
        self.0.close();
    }
}

/// Reads the operating system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_nanos(&self) -> i64 {
        LogicalTime::from(SystemTime::now()).as_nanos()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Wakeup: Send, Sync, Clone);
        static_assertions::assert_impl_all!(SystemTimeSource: TimeSource);
        static_assertions::assert_obj_safe!(Alarm, TimeSource);
    }

    #[test]
    fn wakeup_signals_do_not_accumulate() {
        let (wakeup, signals) = Wakeup::pair();

        wakeup.fire();
        wakeup.fire();

        assert!(signals.try_recv().is_ok());
        assert!(signals.try_recv().is_err());
    }

    #[test]
    fn wakeup_close_ends_receiver() {
        let (wakeup, signals) = Wakeup::pair();

        wakeup.close();
        wakeup.fire();

        assert!(signals.recv_blocking().is_err());
    }

    #[cfg(not(miri))] // Miri is not compatible with FFI calls this needs to make.
    #[test]
    fn system_time_source_reads_wall_clock() {
        let before = LogicalTime::from(SystemTime::now()).as_nanos();
        let now = SystemTimeSource.now_nanos();

        assert!(now >= before);
    }

    #[test]
    fn alarm_id_roundtrip() {
        assert_eq!(AlarmId::new(7).get(), 7);
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::LogicalTime;
use crate::runtime::{Alarm, AlarmId, TimeSource, Wakeup};
use crate::timers::{TimerId, Timers};

/// State shared by the clock, the timer manager, timer handles and the drain worker.
#[derive(Debug)]
pub(crate) struct Shared {
    offset: AtomicI64,
    source: Box<dyn TimeSource>,
    pub alarm: Box<dyn Alarm>,
    pub wakeup: Wakeup,
    pub restarts: AtomicU64,

    // One lock guards the registry and the armed alarm. Every critical section is bounded
    // by the number of pending timers; nothing inside waits on a consumer or on real time.
    scheduler: Mutex<Scheduler>,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    pub timers: Timers,
    armed: Option<AlarmId>,
    last_id: u64,
    pub shut_down: bool,
}

impl Shared {
    pub fn new(source: Box<dyn TimeSource>, alarm: Box<dyn Alarm>, offset: i64) -> (Arc<Self>, Receiver<()>) {
        let (wakeup, signals) = Wakeup::pair();

        let shared = Arc::new(Self {
            offset: AtomicI64::new(offset),
            source,
            alarm,
            wakeup,
            restarts: AtomicU64::new(0),
            scheduler: Mutex::new(Scheduler::default()),
        });

        (shared, signals)
    }

    /// Real time plus offset. Lock-free; may observe an offset that is being replaced.
    pub fn now(&self) -> LogicalTime {
        LogicalTime::from_nanos(self.source.now_nanos()).shifted(self.offset())
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Replaces the offset under the scheduler lock and reprograms the alarm.
    ///
    /// Returns the previous and the new offset.
    pub fn update_offset(&self, update: impl FnOnce(i64) -> i64) -> (i64, i64) {
        let mut scheduler = self.lock();

        let previous = self.offset();
        let offset = update(previous);
        self.offset.store(offset, Ordering::Release);

        self.rearm(&mut scheduler, self.now());

        (previous, offset)
    }

    pub fn lock(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock()
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Points the alarm at the earliest deadline, or disarms it when no timers are pending.
    ///
    /// The existing schedule is reprogrammed in place; a new one is armed only when the
    /// previous schedule already fired or none exists, so at most one is ever outstanding.
    pub fn rearm(&self, scheduler: &mut Scheduler, now: LogicalTime) {
        let Some(deadline) = scheduler.timers.next_deadline() else {
            if let Some(id) = scheduler.armed.take() {
                _ = self.alarm.cancel(id);
                trace!(alarm_id = id.get(), "alarm disarmed");
            }
            return;
        };

        let delay = deadline.saturating_duration_since(now);

        if let Some(id) = scheduler.armed
            && self.alarm.reset(id, delay)
        {
            trace!(alarm_id = id.get(), ?delay, "alarm reprogrammed");
            return;
        }

        let id = self.alarm.arm(delay, self.wakeup.clone());
        scheduler.armed = Some(id);
        trace!(alarm_id = id.get(), ?delay, "alarm armed");
    }
}

impl Shared {
    /// Replaces whatever alarm schedule is left with a retry after `delay`.
    ///
    /// Used when a drain fault leaves the alarm spent while overdue timers are still at the
    /// head of the registry; nothing else would rearm it.
    pub fn arm_retry(&self, delay: Duration) {
        let mut scheduler = self.lock();
        if scheduler.shut_down || scheduler.timers.is_empty() {
            return;
        }

        if let Some(id) = scheduler.armed.take() {
            _ = self.alarm.cancel(id);
        }

        let id = self.alarm.arm(delay, self.wakeup.clone());
        scheduler.armed = Some(id);
        trace!(alarm_id = id.get(), ?delay, "drain retry armed");
    }
}

impl Scheduler {
    pub fn next_id(&mut self) -> TimerId {
        self.last_id = self.last_id.wrapping_add(1);
        TimerId::new(self.last_id)
    }

    /// Forgets the armed alarm and hands it back for cancellation.
    pub fn take_armed(&mut self) -> Option<AlarmId> {
        self.armed.take()
    }

    #[cfg(test)]
    pub fn armed(&self) -> Option<AlarmId> {
        self.armed
    }
}

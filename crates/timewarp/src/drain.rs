// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The drain worker: delivers due timers whenever the alarm fires.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_channel::{Receiver, TrySendError};
use tracing::{error, trace, warn};

use crate::state::Shared;
use crate::{Error, LogicalTime, Result};

pub(crate) const DEFAULT_WORKER_NAME: &str = "timewarp-drain";

/// Delay before the drain is retried when a recovery drain faulted as well.
pub(crate) const FAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Delivers every timer whose deadline is at or before the current logical time and
/// reprograms the alarm for whatever is left. Returns the number of delivered ticks.
pub(crate) fn drain_due(shared: &Shared) -> usize {
    let started = shared.alarm.read_monotonic();
    let mut scheduler = shared.lock();
    let now = shared.now();
    let mut delivered = 0;

    while let Some((id, deadline, entry)) = scheduler.timers.pop_due(now) {
        match entry.ticks.try_send(now) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                trace!(timer_id = id.get(), "previous tick not consumed, tick dropped");
            }
            Err(TrySendError::Closed(_)) => continue,
        }

        if !entry.is_periodic() {
            continue;
        }

        let next = next_periodic_deadline(deadline, entry.period, now);
        if next > now {
            scheduler.timers.insert(id, next, entry);
        } else {
            warn!(timer_id = id.get(), "periodic timer reached the end of logical time");
        }
    }

    shared.rearm(&mut scheduler, shared.now());
    drop(scheduler);

    trace!(
        delivered,
        elapsed = ?shared.alarm.read_monotonic().saturating_duration_since(started),
        "drain cycle completed"
    );

    delivered
}

/// The first deadline on the periodic grid `deadline + k * period` that lies after `now`.
///
/// Missed periods are skipped in one step; the single-slot queue could not hold their ticks
/// anyway.
fn next_periodic_deadline(deadline: LogicalTime, period: Duration, now: LogicalTime) -> LogicalTime {
    let next = deadline.saturating_add(period);
    if next > now {
        return next;
    }

    let behind = now.saturating_duration_since(deadline).as_nanos();
    let period = period.as_nanos().max(1);
    let skip = (behind / period).saturating_add(1).saturating_mul(period);

    deadline.saturating_add(Duration::from_nanos(u64::try_from(skip).unwrap_or(u64::MAX)))
}

/// Starts the supervised drain worker thread.
pub(crate) fn spawn_worker(name: String, shared: Arc<Shared>, signals: Receiver<()>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || supervise(&shared, &signals))
        .map_err(|e| Error::spawn(name, e))
}

/// Drains on every wake-up signal until the signal channel closes.
///
/// A panic inside a drain cycle is caught here: it is logged, counted, and followed by one
/// recovery drain that rearms the alarm before waiting for signals again. When the recovery
/// drain faults as well, the alarm is armed for a retry after [`FAULT_RETRY_DELAY`], so
/// delivery resumes once the fault clears.
#[cfg_attr(test, mutants::skip)] // Causes test timeout.
pub(crate) fn supervise(shared: &Shared, signals: &Receiver<()>) {
    let mut recover = false;

    loop {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(shared, signals, &mut recover)));

        let Err(payload) = outcome else {
            trace!("wake-up channel closed, drain worker exiting");
            return;
        };

        let restarts = shared.restarts.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        error!(restarts, fault = panic_message(payload.as_ref()), "drain worker faulted, restarting");

        // `recover` is still set if the recovery drain itself faulted.
        if recover {
            recover = false;
            if panic::catch_unwind(AssertUnwindSafe(|| shared.arm_retry(FAULT_RETRY_DELAY))).is_err() {
                error!(restarts, "drain retry could not be armed");
            }
        } else {
            recover = true;
        }
    }
}

fn run(shared: &Shared, signals: &Receiver<()>, recover: &mut bool) {
    if *recover {
        drain_due(shared);
        *recover = false;
    }

    while signals.recv_blocking().is_ok() {
        drain_due(shared);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown fault")
}

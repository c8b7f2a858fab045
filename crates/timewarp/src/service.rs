// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::drain::{DEFAULT_WORKER_NAME, spawn_worker};
use crate::runtime::{Alarm, SystemTimeSource, ThreadAlarm, TimeSource};
use crate::state::Shared;
use crate::{Clock, Result, TimerManager};

/// A running virtual clock and timer scheduler.
///
/// The service owns the scheduler state and the drain worker, a background thread that
/// delivers due timers whenever the alarm fires. It hands out [`Clock`] and
/// [`TimerManager`] handles that share that state; create as many services as you need
/// independent scheduling domains.
///
/// Shutting the service down (explicitly or by dropping it) stops every pending timer,
/// closing their queues, and joins the drain worker. Timers created afterwards through a
/// surviving [`TimerManager`] never fire.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use timewarp::TimeService;
///
/// let service = TimeService::new()?;
/// let clock = service.clock();
/// let timers = service.timers();
///
/// let timer = timers.create_one_shot(Duration::from_secs(60));
///
/// // Jump 59 seconds ahead; the timer now fires about a second from now.
/// clock.advance(Duration::from_secs(59));
///
/// let fired_at = timer.recv_blocking().ok_or("timer closed")?;
/// assert!(fired_at >= clock.now().saturating_sub(Duration::from_secs(1)));
///
/// service.shutdown();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct TimeService {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TimeService {
    /// Starts a service that follows the system wall clock, driven by a [`ThreadAlarm`].
    ///
    /// # Errors
    ///
    /// Returns an error if the alarm or drain worker thread cannot be spawned.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Returns a builder to configure the service.
    #[must_use]
    pub fn builder() -> TimeServiceBuilder {
        TimeServiceBuilder::default()
    }

    /// Returns the logical clock of this service.
    #[must_use]
    pub fn clock(&self) -> Clock {
        Clock::new(Arc::clone(&self.shared))
    }

    /// Returns the timer manager of this service.
    #[must_use]
    pub fn timers(&self) -> TimerManager {
        TimerManager::new(Arc::clone(&self.shared))
    }

    /// Returns how many times the drain worker recovered from a fault.
    #[must_use]
    pub fn restart_count(&self) -> u64 {
        self.shared.restart_count()
    }

    /// Stops every pending timer and waits for the drain worker to exit.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let cancelled = {
            let mut scheduler = self.shared.lock();
            scheduler.shut_down = true;

            if let Some(id) = scheduler.take_armed() {
                _ = self.shared.alarm.cancel(id);
            }

            scheduler.timers.clear()
        };

        self.shared.wakeup.close();
        _ = worker.join();

        info!(cancelled, "time service shut down");
    }
}

impl Drop for TimeService {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Configures and starts a [`TimeService`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use timewarp::TimeService;
/// use timewarp::runtime::ThreadAlarm;
///
/// let service = TimeService::builder()
///     .alarm(ThreadAlarm::new()?)
///     .initial_offset(-3_600_000_000_000)
///     .worker_name("scenario-drain")
///     .build()?;
///
/// assert_eq!(service.clock().offset(), -3_600_000_000_000);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct TimeServiceBuilder {
    alarm: Option<Box<dyn Alarm>>,
    time_source: Option<Box<dyn TimeSource>>,
    initial_offset: i64,
    worker_name: Option<String>,
}

impl TimeServiceBuilder {
    /// Sets the alarm that wakes the drain worker. Defaults to a [`ThreadAlarm`].
    #[must_use]
    pub fn alarm(mut self, alarm: impl Alarm) -> Self {
        self.alarm = Some(Box::new(alarm));
        self
    }

    /// Sets the source of real time. Defaults to [`SystemTimeSource`].
    #[must_use]
    pub fn time_source(mut self, time_source: impl TimeSource) -> Self {
        self.time_source = Some(Box::new(time_source));
        self
    }

    /// Sets the offset, in nanoseconds, the clock starts with. Defaults to zero.
    #[must_use]
    pub const fn initial_offset(mut self, offset: i64) -> Self {
        self.initial_offset = offset;
        self
    }

    /// Sets the name of the drain worker thread.
    #[must_use]
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = Some(name.into());
        self
    }

    /// Uses `control` as both the alarm and the source of real time.
    #[cfg(any(feature = "test-util", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
    #[must_use]
    pub fn control(self, control: &crate::AlarmControl) -> Self {
        self.alarm(control.clone()).time_source(control.clone())
    }

    /// Starts the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the default alarm or the drain worker thread cannot be spawned.
    pub fn build(self) -> Result<TimeService> {
        let alarm = match self.alarm {
            Some(alarm) => alarm,
            None => Box::new(ThreadAlarm::new()?),
        };
        let time_source = self.time_source.unwrap_or_else(|| Box::new(SystemTimeSource));
        let worker_name = self.worker_name.unwrap_or_else(|| DEFAULT_WORKER_NAME.to_owned());

        let (shared, signals) = Shared::new(time_source, alarm, self.initial_offset);
        let worker = spawn_worker(worker_name, Arc::clone(&shared), signals)?;

        debug!(offset = self.initial_offset, "time service started");

        Ok(TimeService {
            shared,
            worker: Some(worker),
        })
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(
    test,
    allow(
        clippy::arithmetic_side_effects,
        clippy::unchecked_time_subtraction,
        reason = "allow these lints in tests to improve the readability of the tests"
    )
)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A shiftable logical clock with one-shot and periodic timers that follow it.
//!
//! Logical time is real time plus a signed offset. Moving the offset forward makes every
//! pending timer fire that much sooner; moving it back delays them. This lets tests and
//! simulations jump over hours of time-dependent behavior in milliseconds of real time,
//! while the code under test keeps using plain durations.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use timewarp::TimeService;
//!
//! let service = TimeService::new()?;
//! let clock = service.clock();
//!
//! let lease = service.timers().create_one_shot(Duration::from_secs(3600));
//!
//! // Skip the hour.
//! clock.advance(Duration::from_secs(3600));
//!
//! let expired_at = lease.recv_blocking().ok_or("lease timer closed")?;
//! println!("lease expired at {}ns", expired_at.as_nanos());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Overview
//!
//! - [`TimeService`] - Owns the scheduler and its drain worker, hands out the handles below.
//! - [`Clock`] - Reads logical time and changes the offset.
//! - [`TimerManager`] - Creates, resets and stops timers.
//! - [`TimerHandle`] - Receives the ticks of one timer; also a `Stream`.
//! - [`LogicalTime`] - A point on the logical timeline, in nanoseconds since the UNIX epoch.
//! - [`AlarmControl`] - Drives real time manually in tests. Available when the `test-util`
//!   feature is enabled.
//! - [`runtime`] - The alarm and time source the scheduler is driven by.
//! - [`Error`] - Represents an error that can occur when starting a service. Provides limited
//!   introspection capabilities.
//!
//! # How timers follow the offset
//!
//! Every timer stores an absolute logical deadline, fixed when it is created or reset.
//! A single real alarm is armed for the earliest deadline, whatever the number of pending
//! timers. Changing the offset recomputes the real delay of that one alarm and leaves the
//! deadlines alone, so a one-shot timer of 60 seconds fires after one second of real time
//! once the clock is moved 59 seconds ahead.
//!
//! Periodic timers advance their deadline by exactly one period per tick, measured from the
//! previous deadline, so they never drift. After a large jump, periods that were skipped are
//! not replayed.
//!
//! # Delivery
//!
//! Each timer has a queue with room for a single tick, carrying the logical time at which
//! the expiration was observed. When a tick is due while the previous one was not consumed,
//! the new tick is dropped.
//!
//! # Testing
//!
//! With the `test-util` feature, [`AlarmControl`] replaces both the wall clock and the alarm,
//! so real time only moves when the test says so.
//!
//! ```
//! use std::time::Duration;
//!
//! use timewarp::{AlarmControl, TimeService};
//!
//! let control = AlarmControl::new();
//! let service = TimeService::builder().control(&control).build()?;
//!
//! let ticker = service
//!     .timers()
//!     .create_periodic(Duration::from_secs(1), Duration::from_secs(1));
//!
//! control.advance(Duration::from_secs(1));
//! assert_eq!(ticker.recv_blocking().map(|t| t.as_nanos()), Some(1_000_000_000));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! > **Important:** Never enable the `test-util` feature for production code. Only use it in your `dev-dependencies`.
//!
//! # Features
//!
//! - **`tokio`** - Enables [`runtime::TokioAlarm`], an alarm backed by the
//!   [Tokio](https://tokio.rs/) timer.
//! - **`test-util`** - Enables [`AlarmControl`]. **Only enable this in `dev-dependencies`.**
//! - **`serde`** - Serializes [`LogicalTime`] as integer nanoseconds via [serde](https://serde.rs/).
//! - **`fmt`** - Converts [`LogicalTime`] into a [`jiff::Timestamp`] and displays it as RFC 3339.
//!
//! [`jiff::Timestamp`]: https://docs.rs/jiff/latest/jiff/struct.Timestamp.html

#[cfg(any(feature = "test-util", test))]
mod alarm_control;
mod clock;
mod drain;
mod error;
mod logical_time;
mod service;
mod state;
mod timer_handle;
mod timer_manager;
mod timers;

pub mod runtime;

#[cfg(test)]
mod testing;

#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub use alarm_control::AlarmControl;
pub use clock::Clock;
pub use error::{Error, Result};
pub use logical_time::LogicalTime;
pub use service::{TimeService, TimeServiceBuilder};
pub use timer_handle::TimerHandle;
pub use timer_manager::{MIN_PERIOD, TimerManager};
pub use timers::TimerId;

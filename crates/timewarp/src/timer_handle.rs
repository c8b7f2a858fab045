// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_channel::Receiver;
use futures_core::Stream;
use tracing::trace;

use crate::state::Shared;
use crate::timers::TimerId;
use crate::{LogicalTime, TimerManager};

/// The receiving side of a timer.
///
/// Every expiration pushes the logical time at which it was observed into a single-slot
/// queue. If the previous tick was not consumed yet, the new one is dropped, so a slow
/// consumer only ever sees the latest unconsumed tick.
///
/// The queue of a one-shot timer closes after its single tick; the queue of a periodic
/// timer stays open until the timer is stopped. Either way, once the timer is gone and
/// the buffered tick was taken, [`recv`][Self::recv] returns `None`.
///
/// Dropping the handle stops the timer.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use futures::StreamExt;
/// use timewarp::TimeService;
///
/// # async fn example(service: &TimeService) {
/// let mut ticker = service
///     .timers()
///     .create_periodic(Duration::from_millis(10), Duration::from_millis(10));
///
/// while let Some(at) = ticker.next().await {
///     println!("tick at {}ns", at.as_nanos());
///     # break;
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    // Boxed so that the handle is `Unpin` and works with `StreamExt::next`.
    ticks: Pin<Box<Receiver<LogicalTime>>>,
    owner: Weak<Shared>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade()
            && TimerManager::stop_id(&shared, self.id)
        {
            trace!(timer_id = self.id.get(), "timer stopped on handle drop");
        }
    }
}

impl TimerHandle {
    pub(crate) fn new(id: TimerId, ticks: Receiver<LogicalTime>, owner: Weak<Shared>) -> Self {
        Self {
            id,
            ticks: Box::pin(ticks),
            owner,
        }
    }

    /// Returns the identifier of the timer.
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// Takes the pending tick, if any, without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<LogicalTime> {
        self.ticks.try_recv().ok()
    }

    /// Waits for the next tick.
    ///
    /// Returns `None` once the timer is gone and no tick is pending.
    pub async fn recv(&self) -> Option<LogicalTime> {
        self.ticks.recv().await.ok()
    }

    /// Blocks the current thread until the next tick.
    ///
    /// Returns `None` once the timer is gone and no tick is pending. Do not call this from
    /// an asynchronous context.
    pub fn recv_blocking(&self) -> Option<LogicalTime> {
        self.ticks.recv_blocking().ok()
    }

    /// Returns `true` if the timer will not deliver any further ticks.
    ///
    /// A tick that was delivered before the timer went away may still be pending.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ticks.is_closed()
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(shared))
    }
}

impl Stream for TimerHandle {
    type Item = LogicalTime;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().ticks.as_mut().poll_next(cx)
    }
}

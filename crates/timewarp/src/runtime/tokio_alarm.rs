// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{Alarm, AlarmId, Wakeup};

/// An [`Alarm`] backed by the Tokio timer.
///
/// Each schedule is a spawned task that sleeps for the requested delay and then fires the
/// wake-up. Reprogramming aborts the sleeping task and spawns a replacement under the same
/// [`AlarmId`], so at most one task is alive at a time.
///
/// Available when the `tokio` feature is enabled.
#[derive(Debug)]
pub struct TokioAlarm {
    handle: Handle,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    last_id: u64,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    id: AlarmId,
    task: JoinHandle<()>,
    wakeup: Wakeup,
}

impl TokioAlarm {
    /// Creates an alarm that spawns its timer tasks on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[expect(clippy::new_without_default, reason = "construction requires a runtime context")]
    #[must_use]
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Creates an alarm that spawns its timer tasks on the given runtime.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            state: Mutex::new(State::default()),
        }
    }

    fn spawn(&self, delay: Duration, wakeup: Wakeup) -> JoinHandle<()> {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            wakeup.fire();
        })
    }
}

impl Alarm for TokioAlarm {
    fn read_monotonic(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn arm(&self, delay: Duration, wakeup: Wakeup) -> AlarmId {
        let mut state = self.state.lock();
        state.last_id = state.last_id.wrapping_add(1);
        let id = AlarmId::new(state.last_id);

        let task = self.spawn(delay, wakeup.clone());
        if let Some(previous) = state.pending.replace(Pending { id, task, wakeup }) {
            previous.task.abort();
        }

        id
    }

    fn cancel(&self, id: AlarmId) -> bool {
        let mut state = self.state.lock();

        match state.pending.take() {
            Some(pending) if pending.id == id => {
                let outstanding = !pending.task.is_finished();
                pending.task.abort();
                outstanding
            }
            other => {
                state.pending = other;
                false
            }
        }
    }

    fn reset(&self, id: AlarmId, delay: Duration) -> bool {
        let mut state = self.state.lock();

        match &mut state.pending {
            Some(pending) if pending.id == id && !pending.task.is_finished() => {
                pending.task.abort();
                pending.task = self.spawn(delay, pending.wakeup.clone());
                true
            }
            _ => false,
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Alarm, AlarmId, Wakeup};
use crate::{Error, Result};

const THREAD_NAME: &str = "timewarp-alarm";

/// An [`Alarm`] backed by a dedicated thread.
///
/// The thread waits on a condition variable until the single pending deadline passes,
/// fires the wake-up and goes back to waiting. Reprogramming the alarm only updates the
/// pending deadline and notifies the thread, so no thread is created per schedule.
///
/// The thread stops when the alarm is dropped.
#[derive(Debug)]
pub struct ThreadAlarm {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct State {
    last_id: u64,
    pending: Option<Pending>,
    stopping: bool,
}

#[derive(Debug)]
struct Pending {
    id: AlarmId,
    // `None` when the delay is too large to be represented; such a schedule never fires.
    due: Option<Instant>,
    wakeup: Wakeup,
}

impl ThreadAlarm {
    /// Starts the alarm thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to spawn the thread.
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || thread_shared.run())
            .map_err(|e| Error::spawn(THREAD_NAME, e))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }
}

impl Alarm for ThreadAlarm {
    fn read_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn arm(&self, delay: Duration, wakeup: Wakeup) -> AlarmId {
        let mut state = self.shared.state.lock();
        state.last_id = state.last_id.wrapping_add(1);
        let id = AlarmId::new(state.last_id);

        state.pending = Some(Pending {
            id,
            due: Instant::now().checked_add(delay),
            wakeup,
        });
        self.shared.changed.notify_one();

        id
    }

    fn cancel(&self, id: AlarmId) -> bool {
        let mut state = self.shared.state.lock();

        match &state.pending {
            Some(pending) if pending.id == id => {
                state.pending = None;
                self.shared.changed.notify_one();
                true
            }
            _ => false,
        }
    }

    fn reset(&self, id: AlarmId, delay: Duration) -> bool {
        let mut state = self.shared.state.lock();

        match &mut state.pending {
            Some(pending) if pending.id == id => {
                pending.due = Instant::now().checked_add(delay);
                self.shared.changed.notify_one();
                true
            }
            _ => false,
        }
    }
}

impl Drop for ThreadAlarm {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
            self.shared.changed.notify_one();
        }

        if let Some(thread) = self.thread.take() {
            _ = thread.join();
        }
    }
}

impl Shared {
    #[cfg_attr(test, mutants::skip)] // Causes test timeout.
    fn run(&self) {
        let mut state = self.state.lock();

        while !state.stopping {
            match state.pending.as_ref().map(|p| p.due) {
                Some(Some(due)) if due <= Instant::now() => {
                    if let Some(pending) = state.pending.take() {
                        pending.wakeup.fire();
                    }
                }
                Some(Some(due)) => {
                    _ = self.changed.wait_until(&mut state, due);
                }
                Some(None) | None => self.changed.wait(&mut state),
            }
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;

use crate::drain::drain_due;
use crate::state::Shared;
use crate::{AlarmControl, Clock, TimerManager};

/// Scheduler state driven on the test thread: no worker, wake-ups are drained on demand.
#[derive(Debug)]
pub(crate) struct Harness {
    pub control: AlarmControl,
    pub shared: Arc<Shared>,
    signals: Receiver<()>,
}

impl Harness {
    pub fn new() -> Self {
        let control = AlarmControl::new();
        let (shared, signals) = Shared::new(Box::new(control.clone()), Box::new(control.clone()), 0);

        Self {
            control,
            shared,
            signals,
        }
    }

    pub fn clock(&self) -> Clock {
        Clock::new(Arc::clone(&self.shared))
    }

    pub fn timers(&self) -> TimerManager {
        TimerManager::new(Arc::clone(&self.shared))
    }

    /// Advances real time and runs a drain cycle for every wake-up it caused.
    pub fn advance(&self, duration: Duration) {
        self.control.advance(duration);
        self.drain();
    }

    /// Runs drain cycles while wake-ups are pending.
    pub fn drain(&self) {
        while self.signals.try_recv().is_ok() {
            drain_due(&self.shared);
        }
    }
}

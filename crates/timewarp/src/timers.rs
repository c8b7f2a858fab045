// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_channel::Sender;

use crate::LogicalTime;

/// Opaque identifier of a timer.
///
/// Identifiers are handed out in increasing order and are never reused by the same
/// [`TimeService`][crate::TimeService], so a stale identifier can never address a newer timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Position of a timer in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    deadline: LogicalTime,

    /// Insertion order; keeps timers with equal deadlines in FIFO order.
    sequence: u64,
}

/// What the registry stores for every pending timer besides its position.
#[derive(Debug)]
pub(crate) struct TimerEntry {
    /// `Duration::ZERO` for one-shot timers.
    pub period: Duration,
    pub ticks: Sender<LogicalTime>,
}

impl TimerEntry {
    pub fn is_periodic(&self) -> bool {
        !self.period.is_zero()
    }
}

#[derive(Debug)]
struct Slot {
    key: TimerKey,
    entry: TimerEntry,
}

/// Pending timers ordered by logical deadline, with an index from [`TimerId`] to position.
///
/// Ordering is `(deadline, insertion sequence)`: a timer is placed after every timer with an
/// equal or earlier deadline, which is exactly the position a front-to-back scan for the
/// first strictly later deadline would find.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    queue: BTreeMap<TimerKey, TimerId>,
    index: HashMap<TimerId, Slot>,
    last_sequence: u64,
}

impl Timers {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    /// Inserts a timer; returns `true` if it became the earliest one.
    pub fn insert(&mut self, id: TimerId, deadline: LogicalTime, entry: TimerEntry) -> bool {
        self.last_sequence = self.last_sequence.wrapping_add(1);
        let key = TimerKey {
            deadline,
            sequence: self.last_sequence,
        };

        self.queue.insert(key, id);
        self.index.insert(id, Slot { key, entry });

        self.queue.first_key_value().is_some_and(|(first, _)| *first == key)
    }

    /// Removes a timer. Returns its entry and whether it was the earliest one, or `None` if
    /// no such timer is pending.
    pub fn remove(&mut self, id: TimerId) -> Option<(TimerEntry, bool)> {
        let slot = self.index.remove(&id)?;
        let was_head = self.queue.first_key_value().is_some_and(|(first, _)| *first == slot.key);
        self.queue.remove(&slot.key);

        Some((slot.entry, was_head))
    }

    /// Returns the earliest deadline, or `None` if no timers are pending.
    pub fn next_deadline(&self) -> Option<LogicalTime> {
        self.queue.keys().next().map(|key| key.deadline)
    }

    /// Returns the deadline of a pending timer.
    pub fn deadline(&self, id: TimerId) -> Option<LogicalTime> {
        self.index.get(&id).map(|slot| slot.key.deadline)
    }

    /// Pops the earliest timer if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: LogicalTime) -> Option<(TimerId, LogicalTime, TimerEntry)> {
        let entry = self.queue.first_entry()?;
        if entry.key().deadline > now {
            return None;
        }

        let (key, id) = entry.remove_entry();
        let slot = self.index.remove(&id)?;

        Some((id, key.deadline, slot.entry))
    }

    /// Removes every timer, returning how many were pending.
    pub fn clear(&mut self) -> usize {
        let len = self.queue.len();
        self.queue.clear();
        self.index.clear();
        len
    }
}

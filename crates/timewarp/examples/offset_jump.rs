// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![expect(clippy::unwrap_used, reason = "example code")]

//! This example demonstrates how `AlarmControl` and the clock offset interact.

use std::time::Duration;

use timewarp::{AlarmControl, LogicalTime, TimeService};

fn main() {
    let control = AlarmControl::new();
    let service = TimeService::builder().control(&control).build().unwrap();
    let clock = service.clock();
    let timers = service.timers();

    // Real time does not move on its own.
    assert_eq!(clock.now(), LogicalTime::UNIX_EPOCH);

    let slow = timers.create_one_shot(Duration::from_secs(3));
    let fast = timers.create_one_shot(Duration::from_secs(2));

    // The earlier deadline fires first.
    control.advance(Duration::from_secs(2));
    println!("fast fired at {}ns", fast.recv_blocking().unwrap().as_nanos());
    assert_eq!(slow.try_recv(), None);

    control.advance(Duration::from_secs(1));
    println!("slow fired at {}ns", slow.recv_blocking().unwrap().as_nanos());

    // A one-minute timer, then a 59 second jump: one second of real time remains.
    let minute = timers.create_one_shot(Duration::from_secs(60));
    clock.advance(Duration::from_secs(59));
    assert_eq!(control.pending_delay(), Some(Duration::from_secs(1)));

    control.advance(Duration::from_secs(1));
    println!("minute fired at {}ns", minute.recv_blocking().unwrap().as_nanos());

    // Moving the clock back delays pending timers by the same amount.
    let later = timers.create_one_shot(Duration::from_secs(10));
    clock.rewind(Duration::from_secs(5));
    assert_eq!(control.pending_delay(), Some(Duration::from_secs(15)));

    service.shutdown();
    assert!(later.is_closed());
}

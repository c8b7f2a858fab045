// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! This example demonstrates timers that follow a shifted clock, driven by the Tokio timer.

use std::error::Error;
use std::time::{Duration, Instant};

use futures::StreamExt;
use timewarp::TimeService;
use timewarp::runtime::TokioAlarm;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Drive the scheduler with the Tokio timer instead of a dedicated alarm thread.
    let service = TimeService::builder().alarm(TokioAlarm::new()).build()?;
    let clock = service.clock();
    let timers = service.timers();

    println!("Logical time: {}", clock.now());

    // A reminder an hour from now and a heartbeat every 500ms.
    let reminder = timers.create_one_shot(Duration::from_secs(3600));
    let mut heartbeat = timers.create_periodic(Duration::from_millis(500), Duration::from_millis(500));

    let started = Instant::now();
    for _ in 0..2 {
        if let Some(at) = heartbeat.next().await {
            println!("Heartbeat at {at}");
        }
    }

    // Skip the rest of the hour. The reminder is due right away.
    clock.advance(Duration::from_secs(3600));
    let fired_at = reminder.recv().await.ok_or("reminder timer closed")?;

    println!("Reminder fired at {fired_at} after {}ms of real time", started.elapsed().as_millis());
    println!("Logical time is now {}, offset {}ns", clock.now(), clock.offset());

    // The heartbeat kept its phase across the jump.
    if let Some(deadline) = timers.deadline(&heartbeat) {
        println!("Next heartbeat due at {deadline}");
    }

    service.shutdown();
    Ok(())
}

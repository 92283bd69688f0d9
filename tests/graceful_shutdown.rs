//! Graceful shutdown: in-flight work is drained, waiting work canceled,
//! every rescuer back home, and all threads joinable quickly.

mod common;

use std::time::{Duration, Instant};

use common::*;
use rescuegrid::catalog::Catalog;
use rescuegrid::dispatch::{EmergencyStatus, RescuerStatus};

fn catalog() -> Catalog {
    Catalog {
        grid: grid10(),
        rescuer_types: vec![rescuer_type("AMB", 1, 5, 0, 0)],
        emergency_types: vec![
            // Effectively endless service; only shutdown ends it.
            emergency_type("MARATHON", 1, &[(0, 1, 100_000)]),
            // Needs more units than exist, so it can never allocate.
            emergency_type("SURGE", 0, &[(0, 5, 1)]),
        ],
    }
}

#[test]
fn shutdown_mid_service_drains_everything() {
    let dispatcher = start_dispatcher(catalog(), knobs(), 2);

    let marathon = dispatcher
        .enqueue(&request("MARATHON", 5, 5))
        .expect("enqueue MARATHON");
    let surge = dispatcher
        .enqueue(&request("SURGE", 1, 1))
        .expect("enqueue SURGE");

    assert!(dispatcher.wait_until(WAIT, |s| {
        s.active_record(marathon).map_or(false, |r| {
            r.status == EmergencyStatus::InProgress && r.service_remaining > 0
        })
    }));

    dispatcher.request_shutdown();
    let join_started = Instant::now();
    dispatcher.join();
    assert!(
        join_started.elapsed() < Duration::from_secs(2),
        "workers not joinable within 2s"
    );

    let snapshot = dispatcher.snapshot();
    assert!(snapshot.shutdown);
    assert!(snapshot.active.is_empty());
    assert!(snapshot.waiting.is_empty());
    for rescuer in &snapshot.rescuers {
        assert_eq!(rescuer.status, RescuerStatus::Idle);
        assert_eq!((rescuer.x, rescuer.y), (0, 0));
    }
    // The in-flight record is drained as COMPLETED, the unserviceable one
    // canceled, one terminal event each.
    assert_eq!(
        snapshot.outcome(marathon).map(|o| o.status),
        Some(EmergencyStatus::Completed)
    );
    assert_eq!(
        snapshot.outcome(surge).map(|o| o.status),
        Some(EmergencyStatus::Canceled)
    );
    assert_eq!(snapshot.outcomes.len(), 2);
}

#[test]
fn enqueue_after_shutdown_is_refused() {
    let dispatcher = start_dispatcher(catalog(), knobs(), 2);
    dispatcher.request_shutdown();
    assert!(dispatcher.enqueue(&request("MARATHON", 1, 1)).is_err());
    dispatcher.join();
}

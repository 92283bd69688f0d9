//! Monitor behavior: waiting timeouts and aging-driven reordering.
//!
//! These tests use real wall-clock seconds (aging and timeouts are never
//! scaled by the tick), so the knobs are set to one-or-few-second values.

mod common;

use std::time::Duration;

use common::*;
use rescuegrid::catalog::Catalog;
use rescuegrid::dispatch::{EmergencyStatus, ScheduleKnobs};

/// A catalog with a rescuer type on the books but zero units in the pool,
/// so nothing is ever allocatable.
fn unserviceable_catalog() -> Catalog {
    Catalog {
        grid: grid10(),
        rescuer_types: vec![rescuer_type("AMB", 0, 2, 0, 0)],
        emergency_types: vec![
            emergency_type("FIRE", 1, &[(0, 1, 3)]),
            emergency_type("CAT_IN_TREE", 0, &[(0, 1, 1)]),
            emergency_type("COLLAPSE", 2, &[(0, 1, 1)]),
        ],
    }
}

#[test]
fn unserviceable_emergency_times_out() {
    let knobs = ScheduleKnobs {
        priority_timeouts: [
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(60),
        ],
        aging_start: Duration::from_secs(30),
        aging_step: Duration::from_secs(1),
        tick: TICK,
    };
    let dispatcher = start_dispatcher(unserviceable_catalog(), knobs, 2);
    let id = dispatcher
        .enqueue(&request("FIRE", 4, 4))
        .expect("enqueue FIRE");

    // With no idle rescuer anywhere the distance sentinel applies.
    let snapshot = dispatcher.snapshot();
    let waiting = snapshot.waiting_record(id).expect("record waits");
    assert_eq!(waiting.status, EmergencyStatus::Waiting);
    assert_eq!(waiting.min_distance, 1_000_000);

    // Priority 1 timeout is one second; the monitor must expire it.
    assert!(dispatcher.wait_until(Duration::from_secs(5), |s| {
        s.outcome(id)
            .map_or(false, |o| o.status == EmergencyStatus::TimedOut)
    }));

    let snapshot = dispatcher.snapshot();
    assert!(snapshot.waiting.is_empty());
    // Exactly one terminal event per record.
    assert_eq!(
        snapshot.outcomes.iter().filter(|o| o.id == id).count(),
        1
    );

    dispatcher.shutdown();
}

#[test]
fn aging_lifts_an_old_low_priority_over_fresh_work() {
    let knobs = ScheduleKnobs {
        priority_timeouts: [
            Duration::from_secs(60),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ],
        aging_start: Duration::from_secs(1),
        aging_step: Duration::from_secs(1),
        tick: TICK,
    };
    let dispatcher = start_dispatcher(unserviceable_catalog(), knobs, 2);

    let old_low = dispatcher
        .enqueue(&request("CAT_IN_TREE", 1, 1))
        .expect("enqueue low");

    // Let it age past aging_start + 2 steps: bonus = 2 priority levels.
    std::thread::sleep(Duration::from_millis(3200));

    let fresh_mid = dispatcher
        .enqueue(&request("FIRE", 1, 1))
        .expect("enqueue mid");

    // After the next monitor pass the aged priority-0 record must outrank
    // the fresh priority-1 one.
    assert!(dispatcher.wait_until(Duration::from_secs(5), |s| {
        s.waiting.len() == 2
            && s.waiting[0].id == old_low
            && s.waiting[1].id == fresh_mid
            && s.waiting[0].priority_score > s.waiting[1].priority_score
    }));
    assert_invariants(&dispatcher.snapshot());

    dispatcher.shutdown();
}

#[test]
fn waiting_queue_orders_by_base_priority_before_aging_kicks_in() {
    let dispatcher = start_dispatcher(unserviceable_catalog(), knobs(), 2);

    let low = dispatcher
        .enqueue(&request("CAT_IN_TREE", 1, 1))
        .expect("low");
    let high = dispatcher
        .enqueue(&request("COLLAPSE", 1, 1))
        .expect("high");
    let mid = dispatcher.enqueue(&request("FIRE", 1, 1)).expect("mid");

    assert!(dispatcher.wait_until(WAIT, |s| {
        s.waiting.len() == 3
            && s.waiting[0].id == high
            && s.waiting[1].id == mid
            && s.waiting[2].id == low
    }));

    dispatcher.shutdown();
}

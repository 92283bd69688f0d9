//! Shared fixtures for dispatcher integration tests: tiny in-memory
//! catalogs, a short simulation tick and snapshot invariant checks.
#![allow(dead_code)] // Not every test file uses every helper.

use std::sync::Arc;
use std::time::Duration;

use rescuegrid::catalog::{Catalog, Cell, EmergencyType, Grid, RescuerRequest, RescuerType};
use rescuegrid::dispatch::{
    Dispatcher, EmergencyRequest, EmergencyStatus, ScheduleKnobs, Snapshot,
};
use rescuegrid::eventlog::EventLog;

/// One simulated second. Short enough that full lifecycles finish in
/// milliseconds; wall-clock knobs (timeouts, aging) are set per test.
pub const TICK: Duration = Duration::from_millis(25);

/// Generous deadline for any single lifecycle step under load.
pub const WAIT: Duration = Duration::from_secs(10);

pub fn knobs() -> ScheduleKnobs {
    ScheduleKnobs {
        tick: TICK,
        ..ScheduleKnobs::default()
    }
}

pub fn grid10() -> Grid {
    Grid {
        width: 10,
        height: 10,
    }
}

pub fn rescuer_type(name: &str, count: u32, speed: u32, x: Cell, y: Cell) -> RescuerType {
    RescuerType {
        name: name.to_string(),
        base_x: x,
        base_y: y,
        speed,
        instance_count: count,
    }
}

/// Requests as `(rescuer_type_index, required_count, service_seconds)`.
pub fn emergency_type(name: &str, priority: u8, requests: &[(usize, u32, u64)]) -> EmergencyType {
    EmergencyType {
        name: name.to_string(),
        priority,
        requests: requests
            .iter()
            .map(|&(rescuer_type, required_count, service_seconds)| RescuerRequest {
                rescuer_type,
                required_count,
                service_seconds,
            })
            .collect(),
    }
}

pub fn start_dispatcher(catalog: Catalog, knobs: ScheduleKnobs, workers: usize) -> Arc<Dispatcher> {
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(catalog),
        knobs,
        Arc::new(EventLog::discard()),
    ));
    dispatcher.start(workers).expect("start dispatcher");
    dispatcher
}

pub fn request(type_name: &str, x: Cell, y: Cell) -> EmergencyRequest {
    EmergencyRequest {
        type_name: type_name.to_string(),
        x,
        y,
        timestamp: chrono::Utc::now().timestamp(),
    }
}

/// Check the reachable-state invariants on a snapshot:
/// - a rescuer is assigned to at most one live record
/// - a rescuer is IDLE exactly when no live record holds it
/// - the waiting queue is ordered by score, highest first
/// - ASSIGNED/IN_PROGRESS records hold exactly as many rescuers as their
///   type requires
pub fn assert_invariants(snapshot: &Snapshot) {
    let mut holders: Vec<Option<u64>> = vec![None; snapshot.rescuers.len()];
    for record in snapshot.waiting.iter().chain(snapshot.active.iter()) {
        for &idx in &record.assigned {
            assert!(
                holders[idx].is_none(),
                "rescuer {} assigned to records {:?} and {}",
                idx,
                holders[idx],
                record.id
            );
            holders[idx] = Some(record.id);
        }
    }

    for (idx, rescuer) in snapshot.rescuers.iter().enumerate() {
        let idle = rescuer.status == rescuegrid::dispatch::RescuerStatus::Idle;
        assert_eq!(
            idle,
            holders[idx].is_none(),
            "rescuer {} status {:?} inconsistent with assignment {:?}",
            idx,
            rescuer.status,
            holders[idx]
        );
    }

    for pair in snapshot.waiting.windows(2) {
        assert!(
            pair[0].priority_score >= pair[1].priority_score,
            "waiting queue out of order: {} before {}",
            pair[0].priority_score,
            pair[1].priority_score
        );
    }

    for record in &snapshot.active {
        if matches!(
            record.status,
            EmergencyStatus::Assigned | EmergencyStatus::InProgress
        ) {
            assert_eq!(
                record.assigned.len(),
                record.required_total,
                "record {} holds {} rescuers, needs {}",
                record.id,
                record.assigned.len(),
                record.required_total
            );
        }
    }
}

//! Rescuer allocation and the preemption protocol.
//!
//! Allocation is all-or-nothing: either every slot of every requirement gets
//! a rescuer, or nothing is touched. Preemption reclaims rescuers from
//! strictly lower-priority active records when plain allocation fails.

use std::time::Instant;

use crate::catalog::{manhattan, Catalog};
use crate::eventlog::Category;
use crate::metrics;

use super::state::{DispatchState, EmergencyRecord, EmergencyStatus, RecordId, RescuerStatus};
use super::Shared;

/// Try to reserve one rescuer per needed slot, requirements in declaration
/// order. For each slot the closest idle rescuer of the matching type wins,
/// ties broken by lower rescuer id (pool order). Returns the selected pool
/// indices, or `None` with no state changed.
pub(crate) fn try_allocate(
    state: &DispatchState,
    catalog: &Catalog,
    record: &EmergencyRecord,
) -> Option<Vec<usize>> {
    let ty = &catalog.emergency_types[record.type_idx];
    let mut selected: Vec<usize> = Vec::with_capacity(ty.total_required());

    for request in &ty.requests {
        for _ in 0..request.required_count {
            let mut best: Option<(i64, usize)> = None;
            for (idx, rescuer) in state.pool.iter().enumerate() {
                if rescuer.status != RescuerStatus::Idle {
                    continue;
                }
                if rescuer.type_idx != request.rescuer_type {
                    continue;
                }
                if selected.contains(&idx) {
                    continue;
                }
                let distance = manhattan(rescuer.x, rescuer.y, record.x, record.y);
                if best.map_or(true, |(best_distance, _)| distance < best_distance) {
                    best = Some((distance, idx));
                }
            }
            match best {
                Some((_, idx)) => selected.push(idx),
                None => return None,
            }
        }
    }

    Some(selected)
}

/// Allocation with fallback to preemption. Each failed round either finds a
/// victim to release or gives up; victims are finite and become ineligible
/// once preempted, so the loop terminates.
pub(crate) fn allocate_with_preemption(
    shared: &Shared,
    st: &mut DispatchState,
    record: &EmergencyRecord,
) -> Option<Vec<usize>> {
    loop {
        if let Some(selection) = try_allocate(st, &shared.catalog, record) {
            return Some(selection);
        }
        let victim_id = pick_victim(st, record.priority)?;
        release_victim(shared, st, victim_id, &record.name);
    }
}

/// Choose a victim for a record of base priority `priority`: strictly lower
/// base priority, not already preempted, and every assigned rescuer still
/// reclaimable (EN_ROUTE or ON_SCENE; a RETURNING rescuer has already
/// delivered its service). Lowest base priority wins, ties by lowest score.
fn pick_victim(st: &DispatchState, priority: u8) -> Option<RecordId> {
    st.active
        .iter()
        .filter(|candidate| {
            candidate.priority < priority
                && !candidate.preempted
                && !candidate.assigned.is_empty()
                && candidate.assigned.iter().all(|&idx| {
                    matches!(
                        st.pool[idx].status,
                        RescuerStatus::EnRoute | RescuerStatus::OnScene
                    )
                })
        })
        .min_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.priority_score.cmp(&b.priority_score))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|victim| victim.id)
}

/// Release a victim's rescuers back to their bases and park the record in
/// the waiting queue as PAUSED. `service_remaining` and `first_waiting_at`
/// are untouched: interrupted work resumes with partial credit and keeps
/// aging.
pub(crate) fn release_victim(
    shared: &Shared,
    st: &mut DispatchState,
    victim_id: RecordId,
    beneficiary: &str,
) {
    let Some(mut victim) = st.remove_active(victim_id) else {
        return;
    };

    let released = std::mem::take(&mut victim.assigned);
    for idx in released {
        let (base_x, base_y) = st.rescuer_base(&shared.catalog, idx);
        st.set_rescuer_position(idx, base_x, base_y);
        st.set_rescuer_status(
            &shared.catalog,
            &shared.events,
            idx,
            RescuerStatus::Idle,
            &victim.name,
        );
    }

    let old_status = victim.status;
    victim.status = EmergencyStatus::Paused;
    victim.preempted = true;
    st.rescore_record(&shared.knobs, &mut victim, Instant::now());
    shared.events.event(
        Category::EmergencyStatus,
        "DSP-PREEMPT",
        format!(
            "Emergency '{}' {} -> PAUSED (rescuers reclaimed for '{}')",
            victim.name,
            old_status.as_str(),
            beneficiary
        ),
    );
    metrics::inc_preemptions();
    st.waiting.insert(victim);
    shared.rescuer_available.notify_all();
    shared.bump_progress(st);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EmergencyType, Grid, RescuerRequest, RescuerType};
    use crate::dispatch::ScheduleKnobs;
    use crate::eventlog::EventLog;
    use std::sync::Arc;
    use std::time::Instant;

    fn catalog() -> Catalog {
        Catalog {
            grid: Grid {
                width: 20,
                height: 20,
            },
            rescuer_types: vec![
                RescuerType {
                    name: "AMB".into(),
                    base_x: 0,
                    base_y: 0,
                    speed: 1,
                    instance_count: 3,
                },
                RescuerType {
                    name: "HELI".into(),
                    base_x: 10,
                    base_y: 10,
                    speed: 5,
                    instance_count: 1,
                },
            ],
            emergency_types: vec![
                EmergencyType {
                    name: "CRASH".into(),
                    priority: 1,
                    requests: vec![RescuerRequest {
                        rescuer_type: 0,
                        required_count: 2,
                        service_seconds: 5,
                    }],
                },
                EmergencyType {
                    name: "AIRLIFT".into(),
                    priority: 2,
                    requests: vec![
                        RescuerRequest {
                            rescuer_type: 0,
                            required_count: 1,
                            service_seconds: 3,
                        },
                        RescuerRequest {
                            rescuer_type: 1,
                            required_count: 1,
                            service_seconds: 8,
                        },
                    ],
                },
            ],
        }
    }

    fn record(id: RecordId, type_idx: usize, priority: u8, x: i32, y: i32) -> EmergencyRecord {
        EmergencyRecord {
            id,
            name: format!("E{}", id),
            type_idx,
            status: EmergencyStatus::Waiting,
            x,
            y,
            created_at: 0,
            first_waiting_at: Instant::now(),
            priority,
            priority_score: 0,
            min_distance: 0,
            assigned: Vec::new(),
            service_total: 5,
            service_remaining: 5,
            preempted: false,
        }
    }

    fn shared(catalog: Catalog) -> Shared {
        Shared::new(
            Arc::new(catalog),
            ScheduleKnobs::default(),
            Arc::new(EventLog::discard()),
        )
    }

    #[test]
    fn picks_nearest_idle_of_matching_type() {
        let catalog = catalog();
        let mut state = DispatchState::new(&catalog);
        // Spread the ambulances out; rescuer 2 (pool index 1) is closest.
        state.set_rescuer_position(0, 0, 0);
        state.set_rescuer_position(1, 5, 5);
        state.set_rescuer_position(2, 9, 9);
        let rec = record(1, 0, 1, 6, 6);
        let selection = try_allocate(&state, &catalog, &rec).expect("allocates");
        assert_eq!(selection, vec![1, 2]);
    }

    #[test]
    fn distance_ties_break_by_lower_id() {
        let catalog = catalog();
        let state = DispatchState::new(&catalog);
        // All three ambulances idle at base, equidistant.
        let rec = record(1, 0, 1, 3, 3);
        let selection = try_allocate(&state, &catalog, &rec).expect("allocates");
        assert_eq!(selection, vec![0, 1]);
    }

    #[test]
    fn spans_multiple_requirements_in_order() {
        let catalog = catalog();
        let state = DispatchState::new(&catalog);
        let rec = record(1, 1, 2, 4, 4);
        let selection = try_allocate(&state, &catalog, &rec).expect("allocates");
        assert_eq!(selection.len(), 2);
        assert_eq!(state.pool[selection[0]].type_idx, 0);
        assert_eq!(state.pool[selection[1]].type_idx, 1);
    }

    #[test]
    fn partial_availability_allocates_nothing() {
        let catalog = catalog();
        let mut state = DispatchState::new(&catalog);
        // Only one ambulance idle, CRASH needs two.
        state.pool[0].status = RescuerStatus::EnRoute;
        state.pool[1].status = RescuerStatus::Returning;
        let rec = record(1, 0, 1, 2, 2);
        assert!(try_allocate(&state, &catalog, &rec).is_none());
        assert_eq!(state.pool[2].status, RescuerStatus::Idle);
    }

    #[test]
    fn preemption_releases_lower_priority_victim() {
        let shared = shared(catalog());
        let mut st = DispatchState::new(&shared.catalog);

        // A priority-0 record holds all three ambulances, en route.
        let mut low = record(1, 0, 0, 5, 5);
        low.status = EmergencyStatus::Assigned;
        low.assigned = vec![0, 1, 2];
        for idx in 0..3 {
            st.pool[idx].status = RescuerStatus::EnRoute;
        }
        st.active.push(low);

        let high = record(2, 0, 2, 3, 3);
        let selection =
            allocate_with_preemption(&shared, &mut st, &high).expect("preempts and allocates");
        assert_eq!(selection.len(), 2);

        // Victim is paused, queued, stripped of rescuers; freed units idle.
        assert!(st.active.is_empty());
        let parked = &st.waiting.records()[0];
        assert_eq!(parked.id, 1);
        assert_eq!(parked.status, EmergencyStatus::Paused);
        assert!(parked.preempted);
        assert!(parked.assigned.is_empty());
        assert_eq!(parked.service_remaining, 5);
        for idx in 0..3 {
            assert_eq!(st.pool[idx].status, RescuerStatus::Idle);
        }
    }

    #[test]
    fn returning_rescuers_shield_their_record() {
        let shared = shared(catalog());
        let mut st = DispatchState::new(&shared.catalog);

        let mut low = record(1, 0, 0, 5, 5);
        low.status = EmergencyStatus::InProgress;
        low.assigned = vec![0, 1, 2];
        st.pool[0].status = RescuerStatus::Returning;
        st.pool[1].status = RescuerStatus::EnRoute;
        st.pool[2].status = RescuerStatus::EnRoute;
        st.active.push(low);

        let high = record(2, 0, 2, 3, 3);
        assert!(allocate_with_preemption(&shared, &mut st, &high).is_none());
        assert_eq!(st.active.len(), 1);
        assert!(!st.active[0].preempted);
    }

    #[test]
    fn equal_priority_is_never_preempted() {
        let shared = shared(catalog());
        let mut st = DispatchState::new(&shared.catalog);

        let mut peer = record(1, 0, 1, 5, 5);
        peer.status = EmergencyStatus::Assigned;
        peer.assigned = vec![0, 1, 2];
        for idx in 0..3 {
            st.pool[idx].status = RescuerStatus::EnRoute;
        }
        st.active.push(peer);

        let same_priority = record(2, 0, 1, 3, 3);
        assert!(allocate_with_preemption(&shared, &mut st, &same_priority).is_none());
        assert_eq!(st.active.len(), 1);
    }
}

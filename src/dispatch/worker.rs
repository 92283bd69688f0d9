//! Worker threads: each drives one emergency at a time through its whole
//! lifecycle — allocate, travel, serve, return — sleeping in one-tick slices
//! so shutdown and preemption are observed within a tick.
//!
//! Lock protocol: the worker only touches state under the dispatcher mutex
//! and always drops it before sleeping. Its record lives in the active set
//! while the worker sleeps; the worker re-finds it by id on every wake-up.
//! A record that has vanished from the active set was preempted (parked back
//! in the waiting queue by the preemptor) and is simply abandoned.

use std::time::Instant;

use crate::catalog::travel_seconds;
use crate::eventlog::Category;
use crate::metrics;

use super::state::{DispatchState, EmergencyRecord, EmergencyStatus, RecordId, RescuerStatus};
use super::{alloc, Shared};

/// What a cancellable sleep observed.
enum SleepOutcome {
    Finished,
    Preempted,
    Shutdown,
}

pub(crate) fn run(shared: std::sync::Arc<Shared>) {
    let shared = &*shared;
    loop {
        let mut st = shared.lock();
        while !st.shutdown && st.waiting.is_empty() {
            st = shared
                .emergency_available
                .wait(st)
                .expect("dispatcher state mutex poisoned");
        }
        if st.shutdown {
            return;
        }
        let Some(mut record) = st.waiting.pop_front() else {
            continue;
        };

        let selection = match alloc::allocate_with_preemption(shared, &mut st, &record) {
            Some(selection) => selection,
            None => {
                // Nothing to commit; put the record back where it was and
                // stand down until a rescuer frees up. The wait is bounded
                // by one tick so a feasible allocation elsewhere in the
                // queue is never stalled behind this one.
                metrics::inc_allocation_retries();
                st.rescore_record(&shared.knobs, &mut record, Instant::now());
                st.waiting.insert(record);
                let _ = shared
                    .rescuer_available
                    .wait_timeout(st, shared.knobs.tick)
                    .expect("dispatcher state mutex poisoned");
                continue;
            }
        };

        let record_id = record.id;
        let travel_ticks = commit_assignment(shared, &mut st, record, selection);
        drop(st);

        // Outbound travel.
        match sleep_ticks(shared, record_id, travel_ticks) {
            SleepOutcome::Finished => {}
            SleepOutcome::Preempted => continue,
            SleepOutcome::Shutdown => return,
        }

        // Arrival: everyone on scene, work starts.
        {
            let mut st = shared.lock();
            if st.shutdown {
                release_on_shutdown(shared, &mut st, record_id);
                return;
            }
            let Some(record) = st.active_mut(record_id) else {
                continue;
            };
            let (name, scene_x, scene_y) = (record.name.clone(), record.x, record.y);
            let assigned = record.assigned.clone();
            record.status = EmergencyStatus::InProgress;
            for idx in assigned {
                st.set_rescuer_position(idx, scene_x, scene_y);
                st.set_rescuer_status(
                    &shared.catalog,
                    &shared.events,
                    idx,
                    RescuerStatus::OnScene,
                    &name,
                );
            }
            shared.events.event(
                Category::EmergencyStatus,
                "DSP-INPROGRESS",
                format!("Emergency '{}' ASSIGNED -> IN_PROGRESS", name),
            );
            shared.bump_progress(&mut st);
        }

        // Service: burn one second of remaining work per tick.
        let outcome = loop {
            let mut st = shared.lock();
            if st.shutdown {
                release_on_shutdown(shared, &mut st, record_id);
                return;
            }
            let Some(record) = st.active_mut(record_id) else {
                break SleepOutcome::Preempted;
            };
            if record.service_remaining == 0 {
                // Service delivered; send everyone home. From here on the
                // rescuers are RETURNING and the record is preemption-proof.
                let name = record.name.clone();
                let assigned = record.assigned.clone();
                for idx in assigned {
                    st.set_rescuer_status(
                        &shared.catalog,
                        &shared.events,
                        idx,
                        RescuerStatus::Returning,
                        &name,
                    );
                }
                shared.bump_progress(&mut st);
                break SleepOutcome::Finished;
            }
            record.service_remaining -= 1;
            shared.bump_progress(&mut st);
            drop(st);
            std::thread::sleep(shared.knobs.tick);
        };
        match outcome {
            SleepOutcome::Finished => {}
            SleepOutcome::Preempted => continue,
            SleepOutcome::Shutdown => return,
        }

        // Return travel. Preemption cannot happen to RETURNING rescuers, so
        // only shutdown can interrupt this leg.
        match sleep_ticks(shared, record_id, travel_ticks) {
            SleepOutcome::Finished => {}
            SleepOutcome::Preempted => continue,
            SleepOutcome::Shutdown => return,
        }

        // Home: rescuers idle at base, record completed and retired.
        let mut st = shared.lock();
        if st.shutdown {
            release_on_shutdown(shared, &mut st, record_id);
            return;
        }
        let Some(mut record) = st.remove_active(record_id) else {
            continue;
        };
        let held = std::mem::take(&mut record.assigned);
        for idx in held {
            let (base_x, base_y) = st.rescuer_base(&shared.catalog, idx);
            st.set_rescuer_position(idx, base_x, base_y);
            st.set_rescuer_status(
                &shared.catalog,
                &shared.events,
                idx,
                RescuerStatus::Idle,
                &record.name,
            );
        }
        st.retire(&shared.events, record, EmergencyStatus::Completed, "");
        shared.rescuer_available.notify_all();
        shared.bump_progress(&mut st);
    }
}

/// Commit a successful allocation: rescuers EN_ROUTE, record ASSIGNED and
/// moved into the active set. Only after this point can the preemptor see
/// the record, so it never races a half-built assignment. Returns the travel
/// time in ticks (slowest committed rescuer).
fn commit_assignment(
    shared: &Shared,
    st: &mut DispatchState,
    mut record: EmergencyRecord,
    selection: Vec<usize>,
) -> u64 {
    let mut travel_ticks = 1;
    for &idx in &selection {
        let rescuer = &st.pool[idx];
        let speed = shared.catalog.rescuer_types[rescuer.type_idx].speed;
        let distance = crate::catalog::manhattan(rescuer.x, rescuer.y, record.x, record.y);
        travel_ticks = travel_ticks.max(travel_seconds(distance, speed));
    }

    let old_status = record.status;
    record.assigned = selection.clone();
    record.preempted = false;
    record.status = EmergencyStatus::Assigned;
    let name = record.name.clone();
    for idx in selection {
        st.set_rescuer_status(
            &shared.catalog,
            &shared.events,
            idx,
            RescuerStatus::EnRoute,
            &name,
        );
    }
    shared.events.event(
        Category::EmergencyStatus,
        "DSP-ASSIGNED",
        format!(
            "Emergency '{}' {} -> ASSIGNED ({} rescuers, travel {}s)",
            name,
            old_status.as_str(),
            record.assigned.len(),
            travel_ticks
        ),
    );
    st.active.push(record);
    shared.bump_progress(st);
    travel_ticks
}

/// Sleep `ticks` slices, re-checking shutdown and preemption between each.
/// On shutdown the worker's record is drained before returning.
fn sleep_ticks(shared: &Shared, record_id: RecordId, ticks: u64) -> SleepOutcome {
    for _ in 0..ticks {
        std::thread::sleep(shared.knobs.tick);
        let mut st = shared.lock();
        if st.shutdown {
            release_on_shutdown(shared, &mut st, record_id);
            return SleepOutcome::Shutdown;
        }
        if st.active_mut(record_id).is_none() {
            return SleepOutcome::Preempted;
        }
    }
    SleepOutcome::Finished
}

/// Graceful-drain path: return every held rescuer to base as IDLE and retire
/// the record as COMPLETED.
pub(crate) fn release_on_shutdown(shared: &Shared, st: &mut DispatchState, record_id: RecordId) {
    let Some(mut record) = st.remove_active(record_id) else {
        return;
    };
    let held = std::mem::take(&mut record.assigned);
    for idx in held {
        let (base_x, base_y) = st.rescuer_base(&shared.catalog, idx);
        st.set_rescuer_position(idx, base_x, base_y);
        st.set_rescuer_status(
            &shared.catalog,
            &shared.events,
            idx,
            RescuerStatus::Idle,
            &record.name,
        );
    }
    st.retire(
        &shared.events,
        record,
        EmergencyStatus::Completed,
        "drained at shutdown",
    );
    shared.rescuer_available.notify_all();
    shared.bump_progress(st);
}

//! Aging and timeout monitor: a timekeeper thread that wakes once per tick,
//! expires waiting records that outlived their priority's timeout, refreshes
//! every waiting score (distance drift plus aging bonus) and re-sorts the
//! queue before waking the workers.

use std::time::Instant;

use super::state::EmergencyStatus;
use super::{DispatchState, Shared};

pub(crate) fn run(shared: std::sync::Arc<Shared>) {
    let shared = &*shared;
    let mut st = shared.lock();
    loop {
        if st.shutdown {
            return;
        }
        let (guard, _timed_out) = shared
            .monitor_tick
            .wait_timeout(st, shared.knobs.tick)
            .expect("dispatcher state mutex poisoned");
        st = guard;
        if st.shutdown {
            return;
        }
        pass(shared, &mut st, Instant::now());
    }
}

/// One monitor pass under the lock. Split out so tests can drive it with a
/// controlled clock.
pub(crate) fn pass(shared: &Shared, st: &mut DispatchState, now: Instant) {
    let expired: Vec<_> = st
        .waiting
        .records()
        .iter()
        .filter(|record| {
            record.waiting_age(now) >= shared.knobs.priority_timeouts[usize::from(record.priority)]
        })
        .map(|record| record.id)
        .collect();

    for id in expired {
        if let Some(record) = st.waiting.remove(id) {
            st.retire(
                &shared.events,
                record,
                EmergencyStatus::TimedOut,
                "waiting timeout expired",
            );
        }
    }

    st.rescore_waiting(&shared.knobs, now);
    shared.emergency_available.notify_all();
    shared.bump_progress(st);
}

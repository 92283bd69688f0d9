//! Process-wide dispatch counters. Plain atomics, no exposition endpoint;
//! the shutdown summary and tests read them through [`snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

static REQUESTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static REQUESTS_REJECTED: AtomicU64 = AtomicU64::new(0);
static EMERGENCIES_ENQUEUED: AtomicU64 = AtomicU64::new(0);
static EMERGENCIES_COMPLETED: AtomicU64 = AtomicU64::new(0);
static EMERGENCIES_TIMED_OUT: AtomicU64 = AtomicU64::new(0);
static EMERGENCIES_CANCELED: AtomicU64 = AtomicU64::new(0);
static PREEMPTIONS: AtomicU64 = AtomicU64::new(0);
static ALLOCATION_RETRIES: AtomicU64 = AtomicU64::new(0);

pub fn inc_requests_received() {
    REQUESTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_requests_rejected() {
    REQUESTS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_emergencies_enqueued() {
    EMERGENCIES_ENQUEUED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_emergencies_completed() {
    EMERGENCIES_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_emergencies_timed_out() {
    EMERGENCIES_TIMED_OUT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_emergencies_canceled() {
    EMERGENCIES_CANCELED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_preemptions() {
    PREEMPTIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_allocation_retries() {
    ALLOCATION_RETRIES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Snapshot {
    pub requests_received: u64,
    pub requests_rejected: u64,
    pub emergencies_enqueued: u64,
    pub emergencies_completed: u64,
    pub emergencies_timed_out: u64,
    pub emergencies_canceled: u64,
    pub preemptions: u64,
    pub allocation_retries: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        requests_received: REQUESTS_RECEIVED.load(Ordering::Relaxed),
        requests_rejected: REQUESTS_REJECTED.load(Ordering::Relaxed),
        emergencies_enqueued: EMERGENCIES_ENQUEUED.load(Ordering::Relaxed),
        emergencies_completed: EMERGENCIES_COMPLETED.load(Ordering::Relaxed),
        emergencies_timed_out: EMERGENCIES_TIMED_OUT.load(Ordering::Relaxed),
        emergencies_canceled: EMERGENCIES_CANCELED.load(Ordering::Relaxed),
        preemptions: PREEMPTIONS.load(Ordering::Relaxed),
        allocation_retries: ALLOCATION_RETRIES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        // Only counters no other unit test touches, so parallel test
        // execution cannot skew the deltas.
        let before = snapshot();
        inc_requests_received();
        inc_allocation_retries();
        inc_allocation_retries();
        let after = snapshot();
        assert_eq!(after.requests_received, before.requests_received + 1);
        assert_eq!(after.allocation_retries, before.allocation_retries + 2);
    }
}

//! # Dispatcher Core
//!
//! The runtime heart of the system: a priority waiting queue, an active set,
//! an all-or-nothing allocator with preemption, a pool of worker threads
//! driving emergency lifecycles, and a timekeeper enforcing aging and
//! timeouts.
//!
//! ## Concurrency model
//!
//! Plain OS threads. One `Mutex` guards *all* mutable state — waiting queue,
//! active set, rescuer pool, record fields, the shutdown flag — with four
//! condvars hanging off it:
//!
//! - `emergency_available`: work arrived (queue insert, monitor re-sort,
//!   shutdown).
//! - `rescuer_available`: some rescuer went back to IDLE (completion,
//!   preemption release, shutdown).
//! - `progress`: any lifecycle transition; feeds [`Dispatcher::wait_until`]
//!   for observers and tests.
//! - `monitor_tick`: wakes the monitor early on shutdown.
//!
//! Workers never sleep while holding the lock; every sleep is sliced into
//! ticks that re-check the shutdown flag and preemption. Lifecycle timing
//! (travel, service) is counted in ticks — one simulated second each, 1s by
//! default — while aging and timeouts always use wall-clock seconds.
//!
//! ## Shutdown
//!
//! [`Dispatcher::request_shutdown`] flips the flag and wakes everything;
//! workers drain their in-flight record (rescuers home, record COMPLETED)
//! and exit; [`Dispatcher::join`] then cancels whatever never got served.

pub(crate) mod alloc;
pub(crate) mod monitor;
pub(crate) mod queue;
pub(crate) mod state;
pub(crate) mod worker;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::catalog::{Catalog, Cell};
use crate::config::EnvironmentConfig;
use crate::eventlog::{Category, EventLog};
use crate::metrics;

pub use state::{
    EmergencySnapshot, EmergencyStatus, Outcome, RecordId, RescuerSnapshot, RescuerStatus,
    Snapshot,
};

use state::{DispatchState, EmergencyRecord};

/// Worker threads driving emergencies, unless overridden on the CLI.
pub const DEFAULT_WORKERS: usize = 2;

/// A validated ingress request, ready to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyRequest {
    pub type_name: String,
    pub x: Cell,
    pub y: Cell,
    /// Wall-clock seconds, as sent by the requester.
    pub timestamp: i64,
}

/// Scheduling knobs. Timeouts and aging are wall-clock; `tick` is the
/// simulated-second quantum used for travel and service pacing.
#[derive(Debug, Clone)]
pub struct ScheduleKnobs {
    pub priority_timeouts: [Duration; 3],
    pub aging_start: Duration,
    pub aging_step: Duration,
    pub tick: Duration,
}

impl ScheduleKnobs {
    pub fn from_environment(env: &EnvironmentConfig) -> Self {
        ScheduleKnobs {
            priority_timeouts: [
                Duration::from_secs(env.priority_timeouts[0]),
                Duration::from_secs(env.priority_timeouts[1]),
                Duration::from_secs(env.priority_timeouts[2]),
            ],
            aging_start: Duration::from_secs(env.aging_start),
            aging_step: Duration::from_secs(env.aging_step),
            tick: Duration::from_secs(1),
        }
    }
}

impl Default for ScheduleKnobs {
    fn default() -> Self {
        ScheduleKnobs {
            priority_timeouts: [
                Duration::from_secs(180),
                Duration::from_secs(120),
                Duration::from_secs(60),
            ],
            aging_start: Duration::from_secs(90),
            aging_step: Duration::from_secs(30),
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown emergency type '{0}'")]
    UnknownType(String),
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// State shared between the dispatcher facade and its threads.
pub(crate) struct Shared {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) knobs: ScheduleKnobs,
    pub(crate) events: Arc<EventLog>,
    state: Mutex<DispatchState>,
    pub(crate) emergency_available: Condvar,
    pub(crate) rescuer_available: Condvar,
    pub(crate) monitor_tick: Condvar,
    pub(crate) progress: Condvar,
}

impl Shared {
    pub(crate) fn new(catalog: Arc<Catalog>, knobs: ScheduleKnobs, events: Arc<EventLog>) -> Self {
        Shared {
            state: Mutex::new(DispatchState::new(&catalog)),
            catalog,
            knobs,
            events,
            emergency_available: Condvar::new(),
            rescuer_available: Condvar::new(),
            monitor_tick: Condvar::new(),
            progress: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().expect("dispatcher state mutex poisoned")
    }

    /// Mark a lifecycle transition for observers.
    pub(crate) fn bump_progress(&self, st: &mut DispatchState) {
        st.progress_epoch += 1;
        self.progress.notify_all();
    }
}

/// Owning facade over the dispatcher threads and their shared state.
pub struct Dispatcher {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<Catalog>, knobs: ScheduleKnobs, events: Arc<EventLog>) -> Self {
        Dispatcher {
            shared: Arc::new(Shared::new(catalog, knobs, events)),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the monitor and `worker_count` workers (at least one).
    pub fn start(&self, worker_count: usize) -> std::io::Result<()> {
        let worker_count = worker_count.max(1);
        let mut threads = self.threads.lock().expect("thread registry poisoned");

        let shared = Arc::clone(&self.shared);
        threads.push(
            std::thread::Builder::new()
                .name("dispatch-monitor".to_string())
                .spawn(move || monitor::run(shared))?,
        );
        for n in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("dispatch-worker-{}", n))
                    .spawn(move || worker::run(shared))?,
            );
        }

        self.shared.events.event(
            Category::System,
            "DSP-WORKERS",
            format!("Runtime dispatcher started with {} workers", worker_count),
        );
        Ok(())
    }

    /// Accept a validated request: resolve its type, build the record, score
    /// it and queue it. Fails on unknown types and after shutdown; both are
    /// logged and the caller just drops the request.
    pub fn enqueue(&self, request: &EmergencyRequest) -> Result<RecordId, DispatchError> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if st.shutdown {
            return Err(DispatchError::ShuttingDown);
        }
        let Some(type_idx) = shared.catalog.emergency_type_index(&request.type_name) else {
            shared.events.event(
                Category::EmergencyStatus,
                "DSP-UNKNOWN",
                format!("Unknown emergency type '{}'", request.type_name),
            );
            return Err(DispatchError::UnknownType(request.type_name.clone()));
        };

        let ty = &shared.catalog.emergency_types[type_idx];
        let id = st.next_record_id;
        st.next_record_id += 1;
        let service = ty.service_seconds();
        let mut record = EmergencyRecord {
            id,
            name: ty.name.clone(),
            type_idx,
            status: EmergencyStatus::Waiting,
            x: request.x,
            y: request.y,
            created_at: request.timestamp,
            first_waiting_at: Instant::now(),
            priority: ty.priority,
            priority_score: 0,
            min_distance: 0,
            assigned: Vec::new(),
            service_total: service,
            service_remaining: service,
            preempted: false,
        };
        st.rescore_record(&shared.knobs, &mut record, Instant::now());

        shared.events.event(
            Category::EmergencyStatus,
            "DSP-QUEUE",
            format!(
                "Emergency '{}' queued at ({},{}) priority={} score={} min_distance={}",
                record.name, record.x, record.y, record.priority, record.priority_score,
                record.min_distance
            ),
        );
        metrics::inc_emergencies_enqueued();
        st.waiting.insert(record);
        shared.emergency_available.notify_one();
        shared.bump_progress(&mut st);
        Ok(id)
    }

    /// Flip the shutdown flag and wake every sleeper. Idempotent.
    pub fn request_shutdown(&self) {
        let mut st = self.shared.lock();
        if st.shutdown {
            return;
        }
        st.shutdown = true;
        self.shared.events.event(
            Category::System,
            "DSP-SHUTDOWN",
            "dispatcher shutdown requested",
        );
        self.shared.emergency_available.notify_all();
        self.shared.rescuer_available.notify_all();
        self.shared.monitor_tick.notify_all();
        self.shared.bump_progress(&mut st);
    }

    /// Wait for every dispatcher thread to exit, then drain what never got
    /// served: waiting records become CANCELED, stray actives are released.
    /// Call [`Dispatcher::request_shutdown`] first (or use
    /// [`Dispatcher::shutdown`]).
    pub fn join(&self) {
        let handles: Vec<_> = {
            let mut threads = self.threads.lock().expect("thread registry poisoned");
            threads.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }

        let mut st = self.shared.lock();
        let leftovers = st.waiting.drain_all();
        for record in leftovers {
            st.retire(
                &self.shared.events,
                record,
                EmergencyStatus::Canceled,
                "canceled in shutdown drain",
            );
        }
        // Workers drain their own records on the way out; anything still
        // active here lost its worker to a panic.
        let stray: Vec<_> = st.active.iter().map(|r| r.id).collect();
        for id in stray {
            worker::release_on_shutdown(&self.shared, &mut st, id);
        }
        self.shared.bump_progress(&mut st);
    }

    /// `request_shutdown` + `join`.
    pub fn shutdown(&self) {
        self.request_shutdown();
        self.join();
    }

    pub fn snapshot(&self) -> Snapshot {
        let st = self.shared.lock();
        st.snapshot(&self.shared.catalog, Instant::now())
    }

    /// Block until `predicate` holds for a snapshot or `timeout` elapses.
    /// Re-evaluated on every lifecycle transition via the progress condvar.
    pub fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.lock();
        loop {
            let snapshot = st.snapshot(&self.shared.catalog, Instant::now());
            if predicate(&snapshot) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .shared
                .progress
                .wait_timeout(st, deadline - now)
                .expect("dispatcher state mutex poisoned");
            st = guard;
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.request_shutdown();
        self.join();
    }
}

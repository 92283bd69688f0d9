//! Mutable dispatcher state and the record/twin types that live inside it.
//!
//! Everything here is guarded by the single dispatcher mutex; the only safe
//! way in is through [`super::Shared::lock`]. Records hold pool *indices*,
//! never references, and move between the waiting queue and the active set
//! as owned values.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::catalog::{manhattan, Catalog, Cell};
use crate::eventlog::{Category, EventLog};
use crate::metrics;

use super::queue::WaitingQueue;
use super::ScheduleKnobs;

pub type RecordId = u64;

/// Weight of one base-priority level (and of one aging escalation step) in
/// the composite priority score.
pub(crate) const SCORE_PRIORITY_WEIGHT: i64 = 100_000;

/// `min_distance` sentinel when no rescuer in the pool is idle.
pub(crate) const NO_IDLE_DISTANCE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RescuerStatus {
    Idle,
    EnRoute,
    OnScene,
    Returning,
}

impl RescuerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RescuerStatus::Idle => "IDLE",
            RescuerStatus::EnRoute => "EN_ROUTE",
            RescuerStatus::OnScene => "ON_SCENE",
            RescuerStatus::Returning => "RETURNING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmergencyStatus {
    Waiting,
    Assigned,
    InProgress,
    Paused,
    Completed,
    Canceled,
    TimedOut,
}

impl EmergencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyStatus::Waiting => "WAITING",
            EmergencyStatus::Assigned => "ASSIGNED",
            EmergencyStatus::InProgress => "IN_PROGRESS",
            EmergencyStatus::Paused => "PAUSED",
            EmergencyStatus::Completed => "COMPLETED",
            EmergencyStatus::Canceled => "CANCELED",
            EmergencyStatus::TimedOut => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EmergencyStatus::Completed | EmergencyStatus::Canceled | EmergencyStatus::TimedOut
        )
    }
}

/// One simulated rescue unit ("digital twin"). `type_idx` points into the
/// catalog; `id` is 1-based and unique across the pool.
#[derive(Debug, Clone)]
pub(crate) struct Rescuer {
    pub id: u32,
    pub type_idx: usize,
    pub x: Cell,
    pub y: Cell,
    pub status: RescuerStatus,
}

/// Live dispatcher-side representation of one incident.
#[derive(Debug, Clone)]
pub(crate) struct EmergencyRecord {
    pub id: RecordId,
    /// Emergency type name, duplicated here for log lines.
    pub name: String,
    pub type_idx: usize,
    pub status: EmergencyStatus,
    pub x: Cell,
    pub y: Cell,
    /// Wall-clock seconds from the originating request.
    pub created_at: i64,
    /// When the record first entered the waiting queue. Preemption does not
    /// reset this, so aging keeps accruing across pauses.
    pub first_waiting_at: Instant,
    pub priority: u8,
    pub priority_score: i64,
    pub min_distance: i64,
    /// Pool indices of the rescuers currently committed to this record.
    pub assigned: Vec<usize>,
    pub service_total: u64,
    /// Seconds of on-scene work left. Preserved across preemption so
    /// interrupted work resumes with partial credit.
    pub service_remaining: u64,
    pub preempted: bool,
}

impl EmergencyRecord {
    pub fn waiting_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_waiting_at)
    }
}

/// Terminal outcome journal entry; records themselves are dropped once they
/// reach a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub id: RecordId,
    pub name: String,
    pub status: EmergencyStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RescuerSnapshot {
    pub id: u32,
    pub type_name: String,
    pub x: Cell,
    pub y: Cell,
    pub status: RescuerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencySnapshot {
    pub id: RecordId,
    pub name: String,
    pub status: EmergencyStatus,
    pub x: Cell,
    pub y: Cell,
    pub priority: u8,
    pub priority_score: i64,
    pub min_distance: i64,
    pub assigned: Vec<usize>,
    pub required_total: usize,
    pub service_total: u64,
    pub service_remaining: u64,
    pub preempted: bool,
    pub waiting_age_ms: u64,
}

/// Point-in-time view of the whole dispatcher, for observers and tests.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub rescuers: Vec<RescuerSnapshot>,
    pub waiting: Vec<EmergencySnapshot>,
    pub active: Vec<EmergencySnapshot>,
    pub outcomes: Vec<Outcome>,
    pub shutdown: bool,
}

impl Snapshot {
    pub fn outcome(&self, id: RecordId) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    pub fn waiting_record(&self, id: RecordId) -> Option<&EmergencySnapshot> {
        self.waiting.iter().find(|r| r.id == id)
    }

    pub fn active_record(&self, id: RecordId) -> Option<&EmergencySnapshot> {
        self.active.iter().find(|r| r.id == id)
    }
}

/// All mutable dispatcher state, one big blob behind one big mutex.
pub(crate) struct DispatchState {
    pub pool: Vec<Rescuer>,
    pub waiting: WaitingQueue,
    pub active: Vec<EmergencyRecord>,
    pub outcomes: Vec<Outcome>,
    pub shutdown: bool,
    pub next_record_id: RecordId,
    pub progress_epoch: u64,
}

impl DispatchState {
    pub fn new(catalog: &Catalog) -> Self {
        let mut pool = Vec::with_capacity(catalog.total_rescuers());
        for (type_idx, ty) in catalog.rescuer_types.iter().enumerate() {
            for _ in 0..ty.instance_count {
                pool.push(Rescuer {
                    id: pool.len() as u32 + 1,
                    type_idx,
                    x: ty.base_x,
                    y: ty.base_y,
                    status: RescuerStatus::Idle,
                });
            }
        }
        DispatchState {
            pool,
            waiting: WaitingQueue::new(),
            active: Vec::new(),
            outcomes: Vec::new(),
            shutdown: false,
            next_record_id: 1,
            progress_epoch: 0,
        }
    }

    /// Manhattan distance to the nearest IDLE rescuer of any type, or the
    /// [`NO_IDLE_DISTANCE`] sentinel when nothing is idle.
    pub fn min_idle_distance(&self, x: Cell, y: Cell) -> i64 {
        min_idle_distance_in(&self.pool, x, y)
    }

    pub fn rescuer_base(&self, catalog: &Catalog, idx: usize) -> (Cell, Cell) {
        let ty = &catalog.rescuer_types[self.pool[idx].type_idx];
        (ty.base_x, ty.base_y)
    }

    pub fn set_rescuer_position(&mut self, idx: usize, x: Cell, y: Cell) {
        self.pool[idx].x = x;
        self.pool[idx].y = y;
    }

    /// Transition one rescuer's status, logging the edge.
    pub fn set_rescuer_status(
        &mut self,
        catalog: &Catalog,
        events: &EventLog,
        idx: usize,
        new_status: RescuerStatus,
        emergency_name: &str,
    ) {
        let rescuer = &mut self.pool[idx];
        let old_status = rescuer.status;
        rescuer.status = new_status;
        events.event(
            Category::RescuerStatus,
            "RESC-STATE",
            format!(
                "Rescuer {} ({}) {} -> {} for emergency '{}'",
                rescuer.id,
                catalog.rescuer_types[rescuer.type_idx].name,
                old_status.as_str(),
                new_status.as_str(),
                emergency_name
            ),
        );
    }

    pub fn active_mut(&mut self, id: RecordId) -> Option<&mut EmergencyRecord> {
        self.active.iter_mut().find(|r| r.id == id)
    }

    pub fn remove_active(&mut self, id: RecordId) -> Option<EmergencyRecord> {
        let idx = self.active.iter().position(|r| r.id == id)?;
        Some(self.active.remove(idx))
    }

    /// Recompute `priority_score` and `min_distance` for a record that is
    /// currently owned by the caller (popped or about to be inserted).
    pub fn rescore_record(
        &self,
        knobs: &ScheduleKnobs,
        record: &mut EmergencyRecord,
        now: Instant,
    ) {
        let min_distance = self.min_idle_distance(record.x, record.y);
        let bonus = aging_bonus(knobs, record.waiting_age(now));
        record.min_distance = min_distance;
        record.priority_score = score(record.priority, min_distance, bonus);
    }

    /// Recompute every waiting record's score and restore queue order.
    pub fn rescore_waiting(&mut self, knobs: &ScheduleKnobs, now: Instant) {
        let pool = &self.pool;
        for record in self.waiting.records_mut() {
            let min_distance = min_idle_distance_in(pool, record.x, record.y);
            let bonus = aging_bonus(knobs, record.waiting_age(now));
            record.min_distance = min_distance;
            record.priority_score = score(record.priority, min_distance, bonus);
        }
        self.waiting.resort();
    }

    /// Drive a record into a terminal state: emit its single terminal event,
    /// bump the matching counter and journal the outcome. The record is
    /// consumed; terminal records are not kept.
    pub fn retire(
        &mut self,
        events: &EventLog,
        mut record: EmergencyRecord,
        terminal: EmergencyStatus,
        detail: &str,
    ) {
        debug_assert!(terminal.is_terminal());
        let old_status = record.status;
        record.status = terminal;
        let (event_id, bump): (&str, fn()) = match terminal {
            EmergencyStatus::Completed => ("DSP-COMPLETED", metrics::inc_emergencies_completed),
            EmergencyStatus::TimedOut => ("DSP-TIMEOUT", metrics::inc_emergencies_timed_out),
            _ => ("DSP-CANCELED", metrics::inc_emergencies_canceled),
        };
        let mut message = format!(
            "Emergency '{}' {} -> {}",
            record.name,
            old_status.as_str(),
            terminal.as_str()
        );
        if !detail.is_empty() {
            message.push_str(" (");
            message.push_str(detail);
            message.push(')');
        }
        events.event(Category::EmergencyStatus, event_id, message);
        bump();
        self.outcomes.push(Outcome {
            id: record.id,
            name: record.name,
            status: terminal,
        });
    }

    pub fn snapshot(&self, catalog: &Catalog, now: Instant) -> Snapshot {
        let emergency = |record: &EmergencyRecord| EmergencySnapshot {
            id: record.id,
            name: record.name.clone(),
            status: record.status,
            x: record.x,
            y: record.y,
            priority: record.priority,
            priority_score: record.priority_score,
            min_distance: record.min_distance,
            assigned: record.assigned.clone(),
            required_total: catalog.emergency_types[record.type_idx].total_required(),
            service_total: record.service_total,
            service_remaining: record.service_remaining,
            preempted: record.preempted,
            waiting_age_ms: record.waiting_age(now).as_millis() as u64,
        };
        Snapshot {
            rescuers: self
                .pool
                .iter()
                .map(|r| RescuerSnapshot {
                    id: r.id,
                    type_name: catalog.rescuer_types[r.type_idx].name.clone(),
                    x: r.x,
                    y: r.y,
                    status: r.status,
                })
                .collect(),
            waiting: self.waiting.records().iter().map(emergency).collect(),
            active: self.active.iter().map(emergency).collect(),
            outcomes: self.outcomes.clone(),
            shutdown: self.shutdown,
        }
    }
}

pub(crate) fn min_idle_distance_in(pool: &[Rescuer], x: Cell, y: Cell) -> i64 {
    pool.iter()
        .filter(|r| r.status == RescuerStatus::Idle)
        .map(|r| manhattan(r.x, r.y, x, y))
        .min()
        .unwrap_or(NO_IDLE_DISTANCE)
}

/// Aging bonus for a record of the given waiting age: zero below
/// `aging_start`, then one priority-weight per elapsed `aging_step`.
pub(crate) fn aging_bonus(knobs: &ScheduleKnobs, age: Duration) -> i64 {
    if age < knobs.aging_start {
        return 0;
    }
    let step = knobs.aging_step.as_secs().max(1);
    let overdue = (age - knobs.aging_start).as_secs();
    (overdue / step) as i64 * SCORE_PRIORITY_WEIGHT
}

pub(crate) fn score(base_priority: u8, min_distance: i64, bonus: i64) -> i64 {
    i64::from(base_priority) * SCORE_PRIORITY_WEIGHT - min_distance + bonus
}

//! Waiting queue: a vector kept sorted by priority score, highest first.
//!
//! Queue depth is tens of records at the worst, so a shift-insert into a
//! sorted `Vec` beats anything fancier. Ties rank by `first_waiting_at`
//! (FIFO within equal score), then record id for a deterministic total
//! order.

use std::cmp::Ordering;

use super::state::{EmergencyRecord, RecordId};

#[derive(Default)]
pub(crate) struct WaitingQueue {
    records: Vec<EmergencyRecord>,
}

fn queue_order(a: &EmergencyRecord, b: &EmergencyRecord) -> Ordering {
    b.priority_score
        .cmp(&a.priority_score)
        .then_with(|| a.first_waiting_at.cmp(&b.first_waiting_at))
        .then_with(|| a.id.cmp(&b.id))
}

impl WaitingQueue {
    pub fn new() -> Self {
        WaitingQueue::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shift-insert keeping the queue ordered; every predecessor of the new
    /// record ranks at or above it.
    pub fn insert(&mut self, record: EmergencyRecord) {
        let position = self
            .records
            .iter()
            .position(|existing| queue_order(&record, existing) == Ordering::Less)
            .unwrap_or(self.records.len());
        self.records.insert(position, record);
    }

    /// Remove and return the highest-ranked record.
    pub fn pop_front(&mut self) -> Option<EmergencyRecord> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.records.remove(0))
        }
    }

    pub fn remove(&mut self, id: RecordId) -> Option<EmergencyRecord> {
        let idx = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(idx))
    }

    /// Restore ordering after scores changed in place.
    pub fn resort(&mut self) {
        self.records.sort_by(queue_order);
    }

    pub fn drain_all(&mut self) -> Vec<EmergencyRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn records(&self) -> &[EmergencyRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut EmergencyRecord> {
        self.records.iter_mut()
    }
}

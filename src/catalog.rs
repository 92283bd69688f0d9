//! Static catalog: the immutable data the dispatcher runs against.
//!
//! Everything in here is loaded once at startup from the configuration files
//! and never mutated afterwards, so it can be shared across threads without
//! locking. Records and rescuer twins reference catalog entries by index;
//! the catalog never owns any runtime state.

use serde::Serialize;

/// Grid coordinate. Coordinates are zero-based and exclusive of the grid edge.
pub type Cell = i32;

/// Number of priority levels an emergency type can declare (0..=2, 2 highest).
pub const PRIORITY_LEVELS: usize = 3;

/// Rectangular operations area. Positions are valid when `0 <= x < width`
/// and `0 <= y < height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grid {
    pub width: Cell,
    pub height: Cell,
}

impl Grid {
    pub fn contains(&self, x: Cell, y: Cell) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }
}

/// A category of rescue unit: fixed base, speed and how many twins exist.
#[derive(Debug, Clone, Serialize)]
pub struct RescuerType {
    pub name: String,
    pub base_x: Cell,
    pub base_y: Cell,
    /// Grid cells covered per second of travel.
    pub speed: u32,
    pub instance_count: u32,
}

/// One slot requirement inside an emergency type: how many units of a
/// rescuer type are needed and how long they work on scene.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RescuerRequest {
    /// Index into [`Catalog::rescuer_types`].
    pub rescuer_type: usize,
    pub required_count: u32,
    pub service_seconds: u64,
}

/// A category of emergency: base priority plus the ordered list of rescuer
/// requirements that must all be satisfied before dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyType {
    pub name: String,
    /// 0..=2, with 2 the highest.
    pub priority: u8,
    pub requests: Vec<RescuerRequest>,
}

impl EmergencyType {
    /// Total number of rescuer slots across all requirements.
    pub fn total_required(&self) -> usize {
        self.requests
            .iter()
            .map(|r| r.required_count as usize)
            .sum()
    }

    /// On-scene service time: the longest requirement wins, never below 1s.
    pub fn service_seconds(&self) -> u64 {
        self.requests
            .iter()
            .map(|r| r.service_seconds)
            .max()
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub grid: Grid,
    pub rescuer_types: Vec<RescuerType>,
    pub emergency_types: Vec<EmergencyType>,
}

impl Catalog {
    pub fn emergency_type(&self, name: &str) -> Option<&EmergencyType> {
        self.emergency_types.iter().find(|t| t.name == name)
    }

    pub fn emergency_type_index(&self, name: &str) -> Option<usize> {
        self.emergency_types.iter().position(|t| t.name == name)
    }

    pub fn rescuer_type_index(&self, name: &str) -> Option<usize> {
        self.rescuer_types.iter().position(|t| t.name == name)
    }

    /// Total number of rescuer twins the pool will hold.
    pub fn total_rescuers(&self) -> usize {
        self.rescuer_types
            .iter()
            .map(|t| t.instance_count as usize)
            .sum()
    }
}

/// `|x1-x2| + |y1-y2|`, the only distance metric in the model.
pub fn manhattan(ax: Cell, ay: Cell, bx: Cell, by: Cell) -> i64 {
    (i64::from(ax) - i64::from(bx)).abs() + (i64::from(ay) - i64::from(by)).abs()
}

/// Seconds to cover `distance` at `speed`, rounded up. A dispatch is never
/// instantaneous: zero distance still costs one second.
pub fn travel_seconds(distance: i64, speed: u32) -> u64 {
    let speed = i64::from(speed.max(1));
    let time = (distance.max(0) + speed - 1) / speed;
    (time as u64).max(1)
}

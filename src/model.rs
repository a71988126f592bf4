use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two approaches controlled by the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    #[serde(rename = "Lane 1")]
    Lane1,
    #[serde(rename = "Lane 2")]
    Lane2,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Lane1, Lane::Lane2];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Lane1 => "Lane 1",
            Lane::Lane2 => "Lane 2",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Latest readings for a lane. Never-received and zero are the same value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneObservation {
    /// IR beam reports a vehicle at the stop line.
    pub ir_presence: bool,
    /// Ultrasonic queue count. May exceed the configured maximum.
    pub vehicle_count: u32,
}

impl LaneObservation {
    pub fn new(ir_presence: bool, vehicle_count: u32) -> Self {
        Self {
            ir_presence,
            vehicle_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmergencyState {
    pub active: bool,
    pub lane: Option<Lane>,
}

impl EmergencyState {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active_in(lane: Lane) -> Self {
        Self {
            active: true,
            lane: Some(lane),
        }
    }

    /// Lane that preempts the signal, if any.
    pub fn preempting_lane(&self) -> Option<Lane> {
        if self.active { self.lane } else { None }
    }
}

/// Snapshot of everything the decision engine looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntersectionState {
    pub lane1: LaneObservation,
    pub lane2: LaneObservation,
    pub emergency: EmergencyState,
}

impl IntersectionState {
    pub fn new(lane1: LaneObservation, lane2: LaneObservation, emergency: EmergencyState) -> Self {
        Self {
            lane1,
            lane2,
            emergency,
        }
    }

    pub fn lane(&self, lane: Lane) -> &LaneObservation {
        match lane {
            Lane::Lane1 => &self.lane1,
            Lane::Lane2 => &self.lane2,
        }
    }

    pub fn lane_mut(&mut self, lane: Lane) -> &mut LaneObservation {
        match lane {
            Lane::Lane1 => &mut self.lane1,
            Lane::Lane2 => &mut self.lane2,
        }
    }
}

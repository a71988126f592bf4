//! Sensor fusion and signal timing.
//!
//! Combines the IR and ultrasonic readings of each lane into a confidence
//! score, picks the lane that gets the green light and sizes its green phase.
//! Everything here is pure: the same [`IntersectionState`] always yields the
//! same [`FusionResult`].

use std::fmt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{IntersectionState, Lane, LaneObservation};

/// Lane chosen when vehicle counts tie and no emergency is active.
pub const TIE_BREAK_LANE: Lane = Lane::Lane1;

/// Agreement between the IR and ultrasonic sensors of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Both sensors say empty, or both say occupied.
    Agreement,
    /// Count sees vehicles the IR beam does not; they are likely past the
    /// detection point.
    CountOnly,
    /// IR sees a vehicle but the count is zero.
    IrOnly,
}

impl Confidence {
    pub fn percent(self) -> u32 {
        match self {
            Confidence::Agreement => 100,
            Confidence::CountOnly => 75,
            Confidence::IrOnly => 50,
        }
    }

    pub fn value(self) -> f64 {
        f64::from(self.percent()) / 100.0
    }
}

pub fn confidence(observation: &LaneObservation) -> Confidence {
    match (observation.ir_presence, observation.vehicle_count) {
        (false, 0) => Confidence::Agreement,
        (true, n) if n > 0 => Confidence::Agreement,
        (true, _) => Confidence::IrOnly,
        (false, _) => Confidence::CountOnly,
    }
}

/// Vehicle count used for congestion weighting: an IR hit with an empty
/// count still means one vehicle is waiting.
pub fn reconciled_count(observation: &LaneObservation) -> u32 {
    if observation.ir_presence && observation.vehicle_count == 0 {
        1
    } else {
        observation.vehicle_count
    }
}

/// Emergency lane first, then the longer queue, ties to [`TIE_BREAK_LANE`].
pub fn select_green_lane(state: &IntersectionState) -> Lane {
    if let Some(lane) = state.emergency.preempting_lane() {
        return lane;
    }
    let lane1 = state.lane1.vehicle_count;
    let lane2 = state.lane2.vehicle_count;
    if lane2 > lane1 {
        Lane::Lane2
    } else if lane1 > lane2 {
        Lane::Lane1
    } else {
        TIE_BREAK_LANE
    }
}

/// Advisory findings about a lane's readings. Never blocks a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorWarning {
    IrWithoutCount { lane: Lane },
    CountWithoutIr { lane: Lane, count: u32 },
    CountExceedsMax { lane: Lane, count: u32, max: u32 },
}

impl SensorWarning {
    pub fn lane(&self) -> Lane {
        match *self {
            SensorWarning::IrWithoutCount { lane }
            | SensorWarning::CountWithoutIr { lane, .. }
            | SensorWarning::CountExceedsMax { lane, .. } => lane,
        }
    }
}

impl fmt::Display for SensorWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorWarning::IrWithoutCount { lane } => {
                write!(f, "{lane}: IR detects vehicle but count=0")
            }
            SensorWarning::CountWithoutIr { lane, count } => {
                write!(f, "{lane}: count={count} but IR detects nothing")
            }
            SensorWarning::CountExceedsMax { lane, count, max } => {
                write!(f, "{lane}: ultrasonic count {count} exceeds max ({max})")
            }
        }
    }
}

/// Green phase bounds in seconds. `min <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTiming {
    green_min: u32,
    green_max: u32,
}

impl SignalTiming {
    pub fn new(green_min: u32, green_max: u32) -> Result<Self> {
        if green_min > green_max {
            return Err(Error::Config(format!(
                "green_min ({green_min}) exceeds green_max ({green_max})"
            )));
        }
        Ok(Self {
            green_min,
            green_max,
        })
    }

    pub fn green_min(&self) -> u32 {
        self.green_min
    }

    pub fn green_max(&self) -> u32 {
        self.green_max
    }

    fn clamp(&self, seconds: u64) -> u32 {
        let clamped = seconds.clamp(u64::from(self.green_min), u64::from(self.green_max));
        u32::try_from(clamped).unwrap_or(self.green_max)
    }
}

/// Outcome of one fusion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionResult {
    pub lane1_confidence: Confidence,
    pub lane2_confidence: Confidence,
    pub green_lane: Lane,
    pub green_duration_secs: u32,
}

impl FusionResult {
    pub fn confidence(&self, lane: Lane) -> Confidence {
        match lane {
            Lane::Lane1 => self.lane1_confidence,
            Lane::Lane2 => self.lane2_confidence,
        }
    }

    pub fn average_confidence(&self) -> f64 {
        (self.lane1_confidence.value() + self.lane2_confidence.value()) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionEngine {
    timing: SignalTiming,
    max_vehicles: u32,
}

impl DecisionEngine {
    pub fn new(timing: SignalTiming, max_vehicles: u32) -> Self {
        Self {
            timing,
            max_vehicles,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let timing = SignalTiming::new(config.timing.green_min, config.timing.green_max)?;
        Ok(Self::new(timing, config.timing.max_vehicles))
    }

    pub fn timing(&self) -> SignalTiming {
        self.timing
    }

    pub fn max_vehicles(&self) -> u32 {
        self.max_vehicles
    }

    pub fn validate(&self, lane: Lane, observation: &LaneObservation) -> Vec<SensorWarning> {
        let mut warnings = Vec::new();
        let count = observation.vehicle_count;

        if observation.ir_presence && count == 0 {
            warnings.push(SensorWarning::IrWithoutCount { lane });
        }
        if !observation.ir_presence && count > 0 {
            warnings.push(SensorWarning::CountWithoutIr { lane, count });
        }
        if count > self.max_vehicles {
            warnings.push(SensorWarning::CountExceedsMax {
                lane,
                count,
                max: self.max_vehicles,
            });
        }
        warnings
    }

    /// Green phase length for `lane`, always within the configured bounds.
    pub fn green_duration(&self, lane: Lane, state: &IntersectionState) -> u32 {
        let green_min = self.timing.green_min;
        let green_max = self.timing.green_max;

        if state.emergency.preempting_lane() == Some(lane) {
            return green_max;
        }

        let observation = state.lane(lane);
        let effective = u64::from(reconciled_count(observation));

        let total = u64::from(state.lane1.vehicle_count) + u64::from(state.lane2.vehicle_count);
        if total == 0 {
            return green_min;
        }

        // floor(ratio * span) and floor(base * confidence) in exact integers
        let span = u64::from(green_max - green_min);
        let base = u64::from(green_min) + effective * span / total.max(1);
        let adjusted = base * u64::from(confidence(observation).percent()) / 100;

        self.timing.clamp(adjusted)
    }

    pub fn decide(&self, state: &IntersectionState) -> FusionResult {
        let green_lane = select_green_lane(state);
        FusionResult {
            lane1_confidence: confidence(&state.lane1),
            lane2_confidence: confidence(&state.lane2),
            green_lane,
            green_duration_secs: self.green_duration(green_lane, state),
        }
    }
}

//! JSON payloads exchanged over the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fusion::FusionResult;
use crate::model::{EmergencyState, IntersectionState, Lane, LaneObservation};

/// Reading published on a lane topic, tagged by sensor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor")]
pub enum LaneReading {
    #[serde(rename = "IR")]
    Ir {
        lane: Lane,
        #[serde(with = "flag")]
        vehicle_detected: bool,
    },
    #[serde(rename = "Ultrasonic")]
    Ultrasonic { lane: Lane, vehicle_count: u32 },
}

impl LaneReading {
    pub fn lane(&self) -> Lane {
        match self {
            LaneReading::Ir { lane, .. } | LaneReading::Ultrasonic { lane, .. } => *lane,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmergencySensor {
    #[default]
    #[serde(rename = "RFID")]
    Rfid,
}

/// Reading published on the emergency topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyReading {
    #[serde(default)]
    pub sensor: EmergencySensor,
    #[serde(with = "flag")]
    pub emergency: bool,
    #[serde(default)]
    pub emergency_lane: Option<Lane>,
}

impl EmergencyReading {
    pub fn clear() -> Self {
        Self {
            sensor: EmergencySensor::Rfid,
            emergency: false,
            emergency_lane: None,
        }
    }

    pub fn in_lane(lane: Lane) -> Self {
        Self {
            sensor: EmergencySensor::Rfid,
            emergency: true,
            emergency_lane: Some(lane),
        }
    }

    /// Inactive readings never carry a lane.
    pub fn to_state(&self) -> EmergencyState {
        EmergencyState {
            active: self.emergency,
            lane: if self.emergency {
                self.emergency_lane
            } else {
                None
            },
        }
    }
}

/// Consolidated intersection status published by the gateway and the
/// controller. New fields must be optional so older consumers keep parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(with = "flag")]
    pub lane1_ir: bool,
    #[serde(with = "flag")]
    pub lane2_ir: bool,

    pub lane1_vehicles: u32,
    pub lane2_vehicles: u32,

    pub lane1_confidence: f64,
    pub lane2_confidence: f64,
    pub average_confidence: f64,

    #[serde(with = "flag")]
    pub emergency: bool,
    pub emergency_lane: Option<Lane>,

    pub green_light: Lane,
    pub green_duration: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_mismatches_detected: Option<u64>,
}

impl Summary {
    pub fn from_decision(state: &IntersectionState, result: &FusionResult) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            lane1_ir: state.lane1.ir_presence,
            lane2_ir: state.lane2.ir_presence,
            lane1_vehicles: state.lane1.vehicle_count,
            lane2_vehicles: state.lane2.vehicle_count,
            lane1_confidence: result.lane1_confidence.value(),
            lane2_confidence: result.lane2_confidence.value(),
            average_confidence: result.average_confidence(),
            emergency: state.emergency.active,
            emergency_lane: state.emergency.lane,
            green_light: result.green_lane,
            green_duration: result.green_duration_secs,
            messages_processed: None,
            sensor_mismatches_detected: None,
        }
    }

    pub fn with_stats(mut self, messages_processed: u64, sensor_mismatches: u64) -> Self {
        self.messages_processed = Some(messages_processed);
        self.sensor_mismatches_detected = Some(sensor_mismatches);
        self
    }

    /// Sensor state carried by the summary; decision fields are ignored.
    pub fn intersection_state(&self) -> IntersectionState {
        IntersectionState {
            lane1: LaneObservation::new(self.lane1_ir, self.lane1_vehicles),
            lane2: LaneObservation::new(self.lane2_ir, self.lane2_vehicles),
            emergency: EmergencyReading {
                sensor: EmergencySensor::Rfid,
                emergency: self.emergency,
                emergency_lane: self.emergency_lane,
            }
            .to_state(),
        }
    }
}

/// 0|1 integers on the wire, `bool` in memory. Anything else is rejected.
pub mod flag {
    use serde::de::{Error, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(D::Error::invalid_value(
                Unexpected::Unsigned(other),
                &"0 or 1",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{DecisionEngine, SignalTiming};
    use serde_json::json;

    #[test]
    fn parses_ir_reading() {
        let reading: LaneReading = serde_json::from_value(json!({
            "lane": "Lane 1", "sensor": "IR", "vehicle_detected": 1
        }))
        .unwrap();
        assert_eq!(
            reading,
            LaneReading::Ir {
                lane: Lane::Lane1,
                vehicle_detected: true
            }
        );
    }

    #[test]
    fn parses_ultrasonic_reading() {
        let reading: LaneReading = serde_json::from_str(
            r#"{"lane": "Lane 2", "sensor": "Ultrasonic", "vehicle_count": 14}"#,
        )
        .unwrap();
        assert_eq!(reading.lane(), Lane::Lane2);
        assert!(matches!(
            reading,
            LaneReading::Ultrasonic {
                vehicle_count: 14,
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_lane_payloads() {
        let bad = [
            json!({"lane": "Lane 1", "sensor": "IR", "vehicle_detected": 2}),
            json!({"lane": "Lane 3", "sensor": "IR", "vehicle_detected": 0}),
            json!({"lane": "Lane 1", "sensor": "Lidar", "vehicle_count": 3}),
            json!({"lane": "Lane 1", "sensor": "Ultrasonic", "vehicle_count": -1}),
            json!({"lane": "Lane 1", "sensor": "Ultrasonic"}),
        ];
        for payload in bad {
            assert!(
                serde_json::from_value::<LaneReading>(payload.clone()).is_err(),
                "{payload}"
            );
        }
    }

    #[test]
    fn emergency_reading_with_null_lane() {
        let reading: EmergencyReading = serde_json::from_str(
            r#"{"sensor": "RFID", "emergency": 0, "emergency_lane": null}"#,
        )
        .unwrap();
        assert_eq!(reading.to_state(), EmergencyState::inactive());
    }

    #[test]
    fn inactive_emergency_drops_lane() {
        let reading: EmergencyReading = serde_json::from_value(json!({
            "sensor": "RFID", "emergency": 0, "emergency_lane": "Lane 2"
        }))
        .unwrap();
        assert_eq!(reading.to_state().lane, None);
    }

    #[test]
    fn summary_has_expected_shape() {
        let engine = DecisionEngine::new(SignalTiming::new(10, 45).unwrap(), 20);
        let state = IntersectionState::new(
            LaneObservation::new(true, 0),
            LaneObservation::new(false, 5),
            EmergencyState::inactive(),
        );
        let summary = Summary::from_decision(&state, &engine.decide(&state));
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["lane1_ir"], json!(1));
        assert_eq!(value["lane2_ir"], json!(0));
        assert_eq!(value["lane2_vehicles"], json!(5));
        assert_eq!(value["lane1_confidence"], json!(0.5));
        assert_eq!(value["lane2_confidence"], json!(0.75));
        assert_eq!(value["average_confidence"], json!(0.625));
        assert_eq!(value["emergency"], json!(0));
        assert_eq!(value["emergency_lane"], json!(null));
        assert_eq!(value["green_light"], json!("Lane 2"));
        assert_eq!(value["green_duration"], json!(33));
        assert!(value.get("messages_processed").is_none());
    }

    #[test]
    fn summary_survives_serialization() {
        let engine = DecisionEngine::new(SignalTiming::new(10, 45).unwrap(), 20);
        let state = IntersectionState::new(
            LaneObservation::new(false, 3),
            LaneObservation::new(true, 0),
            EmergencyState::active_in(Lane::Lane2),
        );
        let summary = Summary::from_decision(&state, &engine.decide(&state)).with_stats(12, 3);

        let text = serde_json::to_string(&summary).unwrap();
        let parsed: Summary = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed, summary);
        assert_eq!(parsed.intersection_state(), state);
    }

    #[test]
    fn summary_without_optional_fields_parses() {
        let summary: Summary = serde_json::from_value(json!({
            "lane1_ir": 0, "lane2_ir": 1,
            "lane1_vehicles": 4, "lane2_vehicles": 0,
            "lane1_confidence": 0.75, "lane2_confidence": 0.5,
            "average_confidence": 0.625,
            "emergency": 1, "emergency_lane": "Lane 1",
            "green_light": "Lane 1",
            "green_duration": 45
        }))
        .unwrap();
        assert_eq!(summary.timestamp, None);
        assert_eq!(
            summary.intersection_state().emergency,
            EmergencyState::active_in(Lane::Lane1)
        );
    }
}

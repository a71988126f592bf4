//! Inbound sensor messages to the latest-known intersection snapshot.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::BusMessage;
use crate::config::TopicConfig;
use crate::error::IngestError;
use crate::messages::{EmergencyReading, LaneReading};
use crate::model::{EmergencyState, IntersectionState, Lane};

/// What a single message changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Lane { lane: Lane, reading: LaneReading },
    Emergency(EmergencyState),
}

/// Routes sensor topics to the lane or emergency slot they feed.
#[derive(Debug, Clone)]
pub struct SensorIngestor {
    lane1_topic: String,
    lane2_topic: String,
    emergency_topic: String,
    max_vehicles: u32,
}

impl SensorIngestor {
    pub fn new(topics: &TopicConfig, max_vehicles: u32) -> Self {
        Self {
            lane1_topic: topics.lane1.clone(),
            lane2_topic: topics.lane2.clone(),
            emergency_topic: topics.emergency.clone(),
            max_vehicles,
        }
    }

    pub fn topics(&self) -> [&str; 3] {
        [&self.lane1_topic, &self.lane2_topic, &self.emergency_topic]
    }

    fn lane_for_topic(&self, topic: &str) -> Option<Lane> {
        if topic == self.lane1_topic {
            Some(Lane::Lane1)
        } else if topic == self.lane2_topic {
            Some(Lane::Lane2)
        } else {
            None
        }
    }

    /// Applies `message` to `state`. On error the state is untouched.
    pub fn apply(
        &self,
        state: &mut IntersectionState,
        message: &BusMessage,
    ) -> Result<Update, IngestError> {
        let malformed = |source| IngestError::Malformed {
            topic: message.topic.clone(),
            source,
        };

        if message.topic == self.emergency_topic {
            let reading: EmergencyReading =
                serde_json::from_slice(&message.payload).map_err(malformed)?;
            let emergency = reading.to_state();
            if let Some(lane) = emergency.preempting_lane() {
                warn!(lane = %lane, "emergency vehicle reported");
            }
            state.emergency = emergency;
            return Ok(Update::Emergency(emergency));
        }

        let Some(lane) = self.lane_for_topic(&message.topic) else {
            return Err(IngestError::UnknownTopic(message.topic.clone()));
        };
        let reading: LaneReading = serde_json::from_slice(&message.payload).map_err(malformed)?;

        if reading.lane() != lane {
            warn!(
                topic = %message.topic,
                payload_lane = %reading.lane(),
                "lane field disagrees with topic, using topic lane"
            );
        }

        let observation = state.lane_mut(lane);
        match reading {
            LaneReading::Ir {
                vehicle_detected, ..
            } => {
                debug!(lane = %lane, ir = vehicle_detected, "IR reading");
                observation.ir_presence = vehicle_detected;
            }
            LaneReading::Ultrasonic { vehicle_count, .. } => {
                if vehicle_count > self.max_vehicles {
                    warn!(
                        lane = %lane,
                        count = vehicle_count,
                        max = self.max_vehicles,
                        "vehicle count out of range"
                    );
                }
                debug!(lane = %lane, count = vehicle_count, "ultrasonic reading");
                observation.vehicle_count = vehicle_count;
            }
        }
        Ok(Update::Lane { lane, reading })
    }
}

/// Single writer for a watched snapshot: applies every inbound message in
/// one `send_modify`, so readers only ever see whole updates.
pub fn spawn_ingestion<S, F>(
    mut inbound: mpsc::Receiver<BusMessage>,
    snapshot: watch::Sender<S>,
    mut apply: F,
) -> JoinHandle<()>
where
    S: Send + Sync + 'static,
    F: FnMut(&mut S, &BusMessage) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            snapshot.send_modify(|state| apply(state, &message));
        }
        debug!("inbound stream closed, keeping last known state");
    })
}

//! Final signal decision.
//!
//! Consumes gateway summaries, re-derives the decision from the sensor fields
//! they carry and publishes the result for the dashboard.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, Publisher, log_publish_failure, publish_json};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::fusion::{DecisionEngine, reconciled_count};
use crate::ingest::spawn_ingestion;
use crate::messages::Summary;
use crate::model::IntersectionState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub intersection: IntersectionState,
    pub summaries_received: u64,
    /// `(messages_processed, sensor_mismatches_detected)` from the gateway.
    pub gateway_stats: Option<(u64, u64)>,
}

impl ControllerSnapshot {
    /// Replaces the snapshot with the contents of a gateway summary.
    pub fn apply(&mut self, message: &BusMessage) -> Result<(), IngestError> {
        let summary: Summary =
            serde_json::from_slice(&message.payload).map_err(|source| IngestError::Malformed {
                topic: message.topic.clone(),
                source,
            })?;

        if summary.emergency {
            warn!(lane = ?summary.emergency_lane, "emergency alert from gateway");
        }

        self.intersection = summary.intersection_state();
        self.summaries_received += 1;
        self.gateway_stats = summary
            .messages_processed
            .zip(summary.sensor_mismatches_detected);
        Ok(())
    }
}

pub struct Controller<P> {
    engine: DecisionEngine,
    publisher: P,
    input_topic: String,
    output_topic: String,
    interval: Duration,
}

impl<P: Publisher> Controller<P> {
    pub fn new(config: &Config, publisher: P) -> Result<Self> {
        Ok(Self {
            engine: DecisionEngine::from_config(config)?,
            publisher,
            input_topic: config.topics.gateway.clone(),
            output_topic: config.topics.summary.clone(),
            interval: config.timing.publish_interval(),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    pub fn decide(&self, snapshot: &ControllerSnapshot) -> Summary {
        let state = &snapshot.intersection;
        let result = self.engine.decide(state);

        let selected = state.lane(result.green_lane);
        let effective = reconciled_count(selected);
        if effective != selected.vehicle_count {
            debug!(
                lane = %result.green_lane,
                from = selected.vehicle_count,
                to = effective,
                "IR detected, adjusting count"
            );
        }

        let timing = self.engine.timing();
        info!(
            green = %result.green_lane,
            duration_secs = result.green_duration_secs,
            min = timing.green_min(),
            max = timing.green_max(),
            confidence = result.average_confidence(),
            emergency = ?state.emergency.preempting_lane(),
            "signal decision"
        );

        let summary = Summary::from_decision(state, &result);
        match snapshot.gateway_stats {
            Some((processed, mismatches)) => summary.with_stats(processed, mismatches),
            None => summary,
        }
    }

    pub async fn run(self, inbound: mpsc::Receiver<BusMessage>) {
        let (tx, rx) = watch::channel(ControllerSnapshot::default());
        let _ingestion = spawn_ingestion(inbound, tx, |snapshot: &mut ControllerSnapshot, message| {
            if let Err(e) = snapshot.apply(message) {
                warn!(error = %e, "discarding gateway summary");
            }
        });

        info!(
            input = %self.input_topic,
            output = %self.output_topic,
            "controller started"
        );

        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;

            let snapshot = *rx.borrow();
            let summary = self.decide(&snapshot);
            if let Err(e) =
                publish_json(&self.publisher, &self.output_topic, "controller", &summary).await
            {
                log_publish_failure("controller", &self.output_topic, &e);
            }
        }
    }
}

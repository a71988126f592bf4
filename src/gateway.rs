//! Aggregation gateway.
//!
//! Keeps the latest IR, ultrasonic and RFID readings, validates them on every
//! tick and publishes a consolidated summary with a decision attached.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, Publisher, log_publish_failure, publish_json};
use crate::config::Config;
use crate::error::Result;
use crate::fusion::DecisionEngine;
use crate::ingest::{SensorIngestor, spawn_ingestion};
use crate::messages::Summary;
use crate::model::{IntersectionState, Lane};

/// Everything the ingestion task writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewaySnapshot {
    pub intersection: IntersectionState,
    pub messages_received: u64,
    pub messages_rejected: u64,
}

/// Counters owned by the publishing loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub iterations: u64,
    pub sensor_mismatches: u64,
}

pub struct Gateway<P> {
    engine: DecisionEngine,
    ingestor: SensorIngestor,
    publisher: P,
    output_topic: String,
    interval: Duration,
}

impl<P: Publisher> Gateway<P> {
    pub fn new(config: &Config, publisher: P) -> Result<Self> {
        Ok(Self {
            engine: DecisionEngine::from_config(config)?,
            ingestor: SensorIngestor::new(&config.topics, config.timing.max_vehicles),
            publisher,
            output_topic: config.topics.gateway.clone(),
            interval: config.timing.publish_interval(),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Topics the gateway must be subscribed to.
    pub fn input_topics(&self) -> [&str; 3] {
        self.ingestor.topics()
    }

    /// One validation and decision pass over `snapshot`.
    pub fn evaluate(&self, snapshot: &GatewaySnapshot, stats: &mut GatewayStats) -> Summary {
        stats.iterations += 1;
        let state = &snapshot.intersection;

        for lane in Lane::ALL {
            let warnings = self.engine.validate(lane, state.lane(lane));
            if warnings.is_empty() {
                debug!(lane = %lane, "sensor data validated");
            }
            for warning in warnings {
                stats.sensor_mismatches += 1;
                warn!(lane = %warning.lane(), "{warning}");
            }
        }

        let result = self.engine.decide(state);
        info!(
            iteration = stats.iterations,
            lane1_ir = state.lane1.ir_presence,
            lane1_count = state.lane1.vehicle_count,
            lane1_confidence = result.lane1_confidence.percent(),
            lane2_ir = state.lane2.ir_presence,
            lane2_count = state.lane2.vehicle_count,
            lane2_confidence = result.lane2_confidence.percent(),
            green = %result.green_lane,
            "gateway decision"
        );

        Summary::from_decision(state, &result)
            .with_stats(snapshot.messages_received, stats.sensor_mismatches)
    }

    pub async fn run(self, inbound: mpsc::Receiver<BusMessage>) {
        let (tx, rx) = watch::channel(GatewaySnapshot::default());
        let ingestor = self.ingestor.clone();
        let _ingestion = spawn_ingestion(inbound, tx, move |snapshot, message| {
            snapshot.messages_received += 1;
            if let Err(e) = ingestor.apply(&mut snapshot.intersection, message) {
                snapshot.messages_rejected += 1;
                warn!(error = %e, "discarding sensor message");
            }
        });

        info!(
            topics = ?self.input_topics(),
            output = %self.output_topic,
            interval_ms = self.interval.as_millis() as u64,
            "gateway started"
        );

        let mut interval = time::interval(self.interval);
        let mut stats = GatewayStats::default();
        loop {
            interval.tick().await;

            let snapshot = *rx.borrow();
            let summary = self.evaluate(&snapshot, &mut stats);
            if let Err(e) = publish_json(&self.publisher, &self.output_topic, "gateway", &summary).await
            {
                log_publish_failure("gateway", &self.output_topic, &e);
            }
        }
    }
}

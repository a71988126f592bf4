//! Synthetic sensor feeds.
//!
//! Each simulated sensor is a [`SensorSource`] driven by its own task, so a
//! scripted [`FixtureSource`] can stand in for the random ones.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Serialize;
use tokio::{task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::bus::{Publisher, log_publish_failure, publish_json};
use crate::config::Config;
use crate::messages::{EmergencyReading, LaneReading};
use crate::model::Lane;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorReading {
    Lane(LaneReading),
    Emergency(EmergencyReading),
}

pub trait SensorSource: Send + Sync + 'static {
    fn sensor_id(&self) -> &str;
    fn topic(&self) -> &str;
    fn next_reading(&mut self) -> SensorReading;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Ir(Lane),
    Ultrasonic(Lane),
    Rfid,
}

pub struct SensorSimulator {
    sensor_id: String,
    kind: SensorKind,
    topic: String,
    max_vehicles: u32,
    emergency_probability: f64,
    rng: StdRng,
    message_count: u64,
}

impl SensorSimulator {
    pub fn new(kind: SensorKind, topic: &str, config: &Config, rng: StdRng) -> Self {
        let sensor_id = match kind {
            SensorKind::Ir(lane) => format!("{}-ir", lane_slug(lane)),
            SensorKind::Ultrasonic(lane) => format!("{}-ultrasonic", lane_slug(lane)),
            SensorKind::Rfid => "rfid".to_string(),
        };

        SensorSimulator {
            sensor_id,
            kind,
            topic: topic.to_string(),
            max_vehicles: config.timing.max_vehicles,
            emergency_probability: config.simulator.emergency_probability,
            rng,
            message_count: 0,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    fn generate_ir_reading(&mut self, lane: Lane) -> LaneReading {
        LaneReading::Ir {
            lane,
            vehicle_detected: self.rng.gen_bool(0.5),
        }
    }

    fn generate_ultrasonic_reading(&mut self, lane: Lane) -> LaneReading {
        LaneReading::Ultrasonic {
            lane,
            vehicle_count: self.rng.gen_range(0..=self.max_vehicles),
        }
    }

    fn generate_rfid_reading(&mut self) -> EmergencyReading {
        if self.rng.gen_bool(self.emergency_probability) {
            let lane = self.random_choice(&Lane::ALL).unwrap_or(Lane::Lane1);
            EmergencyReading::in_lane(lane)
        } else {
            EmergencyReading::clear()
        }
    }

    fn random_choice<T: Copy>(&mut self, options: &[T]) -> Option<T> {
        options.choose(&mut self.rng).copied()
    }
}

impl SensorSource for SensorSimulator {
    fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn next_reading(&mut self) -> SensorReading {
        self.message_count += 1;
        match self.kind {
            SensorKind::Ir(lane) => SensorReading::Lane(self.generate_ir_reading(lane)),
            SensorKind::Ultrasonic(lane) => {
                SensorReading::Lane(self.generate_ultrasonic_reading(lane))
            }
            SensorKind::Rfid => SensorReading::Emergency(self.generate_rfid_reading()),
        }
    }
}

/// Replays a fixed list of readings, wrapping around at the end.
pub struct FixtureSource {
    sensor_id: String,
    topic: String,
    readings: Vec<SensorReading>,
    position: usize,
}

impl FixtureSource {
    pub fn new(sensor_id: &str, topic: &str, readings: Vec<SensorReading>) -> Self {
        assert!(!readings.is_empty(), "fixture needs at least one reading");
        Self {
            sensor_id: sensor_id.to_string(),
            topic: topic.to_string(),
            readings,
            position: 0,
        }
    }
}

impl SensorSource for FixtureSource {
    fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn next_reading(&mut self) -> SensorReading {
        let reading = self.readings[self.position].clone();
        self.position = (self.position + 1) % self.readings.len();
        reading
    }
}

fn lane_slug(lane: Lane) -> &'static str {
    match lane {
        Lane::Lane1 => "lane1",
        Lane::Lane2 => "lane2",
    }
}

/// Publishes one reading from `source` per `period`, forever.
pub async fn run_sensor<S, P>(mut source: S, publisher: P, period: Duration)
where
    S: SensorSource,
    P: Publisher,
{
    let mut interval = time::interval(period);
    info!(sensor = source.sensor_id(), topic = source.topic(), "sensor started");

    loop {
        interval.tick().await;

        let reading = source.next_reading();
        if let SensorReading::Emergency(EmergencyReading {
            emergency: true,
            emergency_lane,
            ..
        }) = &reading
        {
            warn!(sensor = source.sensor_id(), lane = ?emergency_lane, "emergency detected");
        }

        match publish_json(&publisher, source.topic(), source.sensor_id(), &reading).await {
            Ok(()) => debug!(sensor = source.sensor_id(), ?reading, "published"),
            Err(e) => log_publish_failure(source.sensor_id(), source.topic(), &e),
        }
    }
}

/// Starts the four lane sensors and the RFID reader.
pub fn spawn_simulators<P: Publisher>(config: &Config, publisher: P) -> Vec<JoinHandle<()>> {
    let topics = &config.topics;
    let sensors = [
        (SensorKind::Ir(Lane::Lane1), topics.lane1.as_str()),
        (SensorKind::Ultrasonic(Lane::Lane1), topics.lane1.as_str()),
        (SensorKind::Ir(Lane::Lane2), topics.lane2.as_str()),
        (SensorKind::Ultrasonic(Lane::Lane2), topics.lane2.as_str()),
        (SensorKind::Rfid, topics.emergency.as_str()),
    ];
    let period = config.timing.publish_interval();

    sensors
        .into_iter()
        .enumerate()
        .map(|(index, (kind, topic))| {
            let rng = match config.simulator.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                None => StdRng::from_entropy(),
            };
            let simulator = SensorSimulator::new(kind, topic, config, rng);
            tokio::spawn(run_sensor(simulator, publisher.clone(), period))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(kind: SensorKind, config: &Config) -> SensorSimulator {
        SensorSimulator::new(kind, "t", config, StdRng::seed_from_u64(7))
    }

    #[test]
    fn ultrasonic_counts_stay_in_range() {
        let config = Config::default();
        let mut sim = simulator(SensorKind::Ultrasonic(Lane::Lane2), &config);
        for _ in 0..500 {
            match sim.next_reading() {
                SensorReading::Lane(LaneReading::Ultrasonic {
                    lane,
                    vehicle_count,
                }) => {
                    assert_eq!(lane, Lane::Lane2);
                    assert!(vehicle_count <= config.timing.max_vehicles);
                }
                other => panic!("unexpected reading {other:?}"),
            }
        }
        assert_eq!(sim.message_count(), 500);
        assert_eq!(sim.sensor_id(), "lane2-ultrasonic");
    }

    #[test]
    fn ir_produces_both_states() {
        let config = Config::default();
        let mut sim = simulator(SensorKind::Ir(Lane::Lane1), &config);
        let detections: Vec<bool> = (0..100)
            .map(|_| match sim.next_reading() {
                SensorReading::Lane(LaneReading::Ir {
                    vehicle_detected, ..
                }) => vehicle_detected,
                other => panic!("unexpected reading {other:?}"),
            })
            .collect();
        assert!(detections.contains(&true));
        assert!(detections.contains(&false));
    }

    #[test]
    fn rfid_respects_probability_extremes() {
        let mut config = Config::default();
        config.simulator.emergency_probability = 0.0;
        let mut quiet = simulator(SensorKind::Rfid, &config);
        for _ in 0..200 {
            assert_eq!(
                quiet.next_reading(),
                SensorReading::Emergency(EmergencyReading::clear())
            );
        }

        config.simulator.emergency_probability = 1.0;
        let mut busy = simulator(SensorKind::Rfid, &config);
        for _ in 0..50 {
            match busy.next_reading() {
                SensorReading::Emergency(reading) => {
                    assert!(reading.emergency);
                    assert!(reading.emergency_lane.is_some());
                }
                other => panic!("unexpected reading {other:?}"),
            }
        }
    }

    #[test]
    fn seeded_simulators_are_reproducible() {
        let config = Config::default();
        let mut a = simulator(SensorKind::Ultrasonic(Lane::Lane1), &config);
        let mut b = simulator(SensorKind::Ultrasonic(Lane::Lane1), &config);
        for _ in 0..20 {
            assert_eq!(a.next_reading(), b.next_reading());
        }
    }

    #[test]
    fn readings_serialize_to_wire_shape() {
        let ir = SensorReading::Lane(LaneReading::Ir {
            lane: Lane::Lane1,
            vehicle_detected: true,
        });
        assert_eq!(
            serde_json::to_value(&ir).unwrap(),
            serde_json::json!({"sensor": "IR", "lane": "Lane 1", "vehicle_detected": 1})
        );

        let rfid = SensorReading::Emergency(EmergencyReading::clear());
        assert_eq!(
            serde_json::to_value(&rfid).unwrap(),
            serde_json::json!({"sensor": "RFID", "emergency": 0, "emergency_lane": null})
        );
    }

    #[test]
    fn fixture_source_wraps_around() {
        let readings = vec![
            SensorReading::Emergency(EmergencyReading::in_lane(Lane::Lane2)),
            SensorReading::Emergency(EmergencyReading::clear()),
        ];
        let mut fixture = FixtureSource::new("rfid", "traffic.emergency", readings.clone());
        assert_eq!(fixture.next_reading(), readings[0]);
        assert_eq!(fixture.next_reading(), readings[1]);
        assert_eq!(fixture.next_reading(), readings[0]);
    }
}

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use traffic_fusion::{
    Config, Lane,
    bus::{BusMessage, MemoryBus, Publisher, publish_json},
    controller::Controller,
    gateway::Gateway,
    messages::{EmergencyReading, LaneReading, Summary},
    sensors::{FixtureSource, SensorReading, run_sensor},
};

const TICK: Duration = Duration::from_millis(20);

struct Pipeline {
    bus: MemoryBus,
    config: Config,
    gateway_out: mpsc::Receiver<BusMessage>,
    summaries: mpsc::Receiver<BusMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    fn start() -> Self {
        let config = Config::default();
        let bus = MemoryBus::default();

        let gateway = Gateway::new(&config, bus.clone()).unwrap().with_interval(TICK);
        let gateway_in = bus.subscribe(&gateway.input_topics());
        let controller = Controller::new(&config, bus.clone())
            .unwrap()
            .with_interval(TICK);
        let controller_in = bus.subscribe(&[controller.input_topic()]);

        let gateway_out = bus.subscribe(&[config.topics.gateway.as_str()]);
        let summaries = bus.subscribe(&[config.topics.summary.as_str()]);

        let tasks = vec![
            tokio::spawn(gateway.run(gateway_in)),
            tokio::spawn(controller.run(controller_in)),
        ];

        Self {
            bus,
            config,
            gateway_out,
            summaries,
            tasks,
        }
    }

    async fn send(&self, topic: &str, reading: &SensorReading) {
        publish_json(&self.bus, topic, "test", reading).await.unwrap();
    }

    async fn next_matching<F>(rx: &mut mpsc::Receiver<BusMessage>, mut accept: F) -> Summary
    where
        F: FnMut(&Summary) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let message = rx.recv().await.expect("bus closed");
                let summary: Summary = serde_json::from_slice(&message.payload).unwrap();
                if accept(&summary) {
                    return summary;
                }
            }
        })
        .await
        .expect("no matching summary before timeout")
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn ir(lane: Lane, detected: bool) -> SensorReading {
    SensorReading::Lane(LaneReading::Ir {
        lane,
        vehicle_detected: detected,
    })
}

fn count(lane: Lane, vehicle_count: u32) -> SensorReading {
    SensorReading::Lane(LaneReading::Ultrasonic {
        lane,
        vehicle_count,
    })
}

#[tokio::test]
async fn disagreeing_sensors_reach_the_summary() {
    let mut pipeline = Pipeline::start();
    let topics = pipeline.config.topics.clone();

    pipeline.send(&topics.lane1, &ir(Lane::Lane1, true)).await;
    pipeline.send(&topics.lane1, &count(Lane::Lane1, 0)).await;
    pipeline.send(&topics.lane2, &ir(Lane::Lane2, false)).await;
    pipeline.send(&topics.lane2, &count(Lane::Lane2, 5)).await;

    let summary = Pipeline::next_matching(&mut pipeline.summaries, |s| {
        s.lane1_ir && s.lane2_vehicles == 5
    })
    .await;

    assert_eq!(summary.green_light, Lane::Lane2);
    assert_eq!(summary.green_duration, 33);
    assert_eq!(summary.lane1_confidence, 0.5);
    assert_eq!(summary.lane2_confidence, 0.75);
    assert!(!summary.emergency);
    assert!(summary.sensor_mismatches_detected.unwrap_or(0) > 0);
}

#[tokio::test]
async fn emergency_fixture_preempts_empty_intersection() {
    let mut pipeline = Pipeline::start();
    let fixture = FixtureSource::new(
        "rfid",
        &pipeline.config.topics.emergency,
        vec![SensorReading::Emergency(EmergencyReading::in_lane(Lane::Lane1))],
    );
    pipeline
        .tasks
        .push(tokio::spawn(run_sensor(fixture, pipeline.bus.clone(), TICK)));

    let summary = Pipeline::next_matching(&mut pipeline.summaries, |s| s.emergency).await;

    assert_eq!(summary.emergency_lane, Some(Lane::Lane1));
    assert_eq!(summary.green_light, Lane::Lane1);
    assert_eq!(summary.green_duration, pipeline.config.timing.green_max);
    assert_eq!(summary.lane1_confidence, 1.0);
}

#[tokio::test]
async fn idle_intersection_defaults_to_lane_one_minimum() {
    let mut pipeline = Pipeline::start();
    let summary = Pipeline::next_matching(&mut pipeline.summaries, |_| true).await;

    assert_eq!(summary.green_light, Lane::Lane1);
    assert_eq!(summary.green_duration, pipeline.config.timing.green_min);
    assert_eq!(summary.average_confidence, 1.0);
}

#[tokio::test]
async fn malformed_messages_are_counted_and_skipped() {
    let mut pipeline = Pipeline::start();
    let topics = pipeline.config.topics.clone();

    pipeline
        .bus
        .publish(&topics.lane2, "test", "{ not json".to_string())
        .await
        .unwrap();
    pipeline
        .bus
        .publish(
            &topics.lane2,
            "test",
            r#"{"lane":"Lane 2","sensor":"IR","vehicle_detected":3}"#.to_string(),
        )
        .await
        .unwrap();
    pipeline.send(&topics.lane2, &count(Lane::Lane2, 7)).await;

    let summary = Pipeline::next_matching(&mut pipeline.gateway_out, |s| {
        s.messages_processed == Some(3)
    })
    .await;

    assert_eq!(summary.lane2_vehicles, 7);
    assert!(!summary.lane2_ir);
    assert_eq!(summary.green_light, Lane::Lane2);
}

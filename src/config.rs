//! Runtime configuration.
//!
//! Every value has a default, so the system runs with no file at all. A TOML
//! file can override any subset, and `TRAFFIC_*` environment variables are
//! applied last.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub topics: TopicConfig,
    pub timing: TimingConfig,
    pub simulator: SimulatorConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub broker: String,
    pub port: u16,
    pub message_timeout_ms: u64,
}

impl BusConfig {
    pub fn bootstrap_servers(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 9092,
            message_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub lane1: String,
    pub lane2: String,
    pub emergency: String,
    /// Aggregated output of the gateway, input of the controller.
    pub gateway: String,
    /// Final decision consumed by the dashboard.
    pub summary: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            lane1: "traffic.lane1".to_string(),
            lane2: "traffic.lane2".to_string(),
            emergency: "traffic.emergency".to_string(),
            gateway: "traffic.gateway".to_string(),
            summary: "traffic.summary".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub publish_interval_secs: u64,
    pub green_min: u32,
    pub green_max: u32,
    pub max_vehicles: u32,
}

impl TimingConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            publish_interval_secs: 2,
            green_min: 10,
            green_max: 45,
            max_vehicles: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Chance per RFID read that an emergency vehicle is reported.
    pub emergency_probability: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            emergency_probability: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub refresh_ms: u64,
}

impl DashboardConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { refresh_ms: 500 }
    }
}

impl Config {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Applies `TRAFFIC_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(broker) = lookup("TRAFFIC_BROKER") {
            self.bus.broker = broker;
        }
        override_parsed(&lookup, "TRAFFIC_PORT", &mut self.bus.port)?;

        let topics = [
            ("TRAFFIC_TOPIC_LANE1", &mut self.topics.lane1),
            ("TRAFFIC_TOPIC_LANE2", &mut self.topics.lane2),
            ("TRAFFIC_TOPIC_EMERGENCY", &mut self.topics.emergency),
            ("TRAFFIC_TOPIC_GATEWAY", &mut self.topics.gateway),
            ("TRAFFIC_TOPIC_SUMMARY", &mut self.topics.summary),
        ];
        for (key, slot) in topics {
            if let Some(topic) = lookup(key) {
                *slot = topic;
            }
        }

        override_parsed(
            &lookup,
            "TRAFFIC_PUBLISH_INTERVAL",
            &mut self.timing.publish_interval_secs,
        )?;
        override_parsed(&lookup, "TRAFFIC_GREEN_MIN", &mut self.timing.green_min)?;
        override_parsed(&lookup, "TRAFFIC_GREEN_MAX", &mut self.timing.green_max)?;
        override_parsed(&lookup, "TRAFFIC_MAX_VEHICLES", &mut self.timing.max_vehicles)?;
        override_parsed(
            &lookup,
            "TRAFFIC_EMERGENCY_PROBABILITY",
            &mut self.simulator.emergency_probability,
        )?;
        if let Some(raw) = lookup("TRAFFIC_SEED") {
            self.simulator.seed = Some(parse_value("TRAFFIC_SEED", &raw)?);
        }
        override_parsed(
            &lookup,
            "TRAFFIC_DASHBOARD_REFRESH_MS",
            &mut self.dashboard.refresh_ms,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        if timing.green_min == 0 {
            return Err(Error::Config("green_min must be positive".into()));
        }
        if timing.green_min > timing.green_max {
            return Err(Error::Config(format!(
                "green_min ({}) exceeds green_max ({})",
                timing.green_min, timing.green_max
            )));
        }
        if timing.publish_interval_secs == 0 {
            return Err(Error::Config("publish_interval_secs must be positive".into()));
        }
        if self.dashboard.refresh_ms == 0 {
            return Err(Error::Config("dashboard refresh_ms must be positive".into()));
        }
        let p = self.simulator.emergency_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::Config(format!(
                "emergency_probability must be within [0, 1], got {p}"
            )));
        }
        if self.bus.broker.is_empty() {
            return Err(Error::Config("broker address is empty".into()));
        }
        Ok(())
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: cannot parse '{raw}'")))
}

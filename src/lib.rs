//! Two-lane intersection control driven by fused IR, ultrasonic and RFID
//! readings exchanged over a publish/subscribe bus.
//!
//! - [`sensors`] publish synthetic readings.
//! - [`gateway`] aggregates and validates them.
//! - [`controller`] makes the final green-light decision.
//! - [`dashboard`] renders the outcome.
//!
//! The decision policy itself lives in [`fusion`] and is shared by every
//! stage.

pub mod bus;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod fusion;
pub mod gateway;
pub mod ingest;
pub mod launcher;
pub mod messages;
pub mod model;
pub mod sensors;

pub use config::Config;
pub use error::{Error, Result};
pub use fusion::{DecisionEngine, FusionResult, SignalTiming};
pub use model::{EmergencyState, IntersectionState, Lane, LaneObservation};

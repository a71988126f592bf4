//! Wires components to a bus and runs them until the process exits.

use futures::future::join_all;
use tracing::{error, info};

use crate::bus::Bus;
use crate::config::Config;
use crate::controller::Controller;
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::sensors::spawn_simulators;

pub async fn run_sensors<B: Bus>(config: &Config, bus: B) -> Result<()> {
    let tasks = spawn_simulators(config, bus);
    info!(sensors = tasks.len(), "sensor simulators running");
    wait_for(tasks).await;
    Ok(())
}

pub async fn run_gateway<B: Bus>(config: &Config, bus: B) -> Result<()> {
    let gateway = Gateway::new(config, bus.clone())?;
    let inbound = bus.subscribe_to("gateway", &gateway.input_topics())?;
    gateway.run(inbound).await;
    Ok(())
}

pub async fn run_controller<B: Bus>(config: &Config, bus: B) -> Result<()> {
    let controller = Controller::new(config, bus.clone())?;
    let inbound = bus.subscribe_to("controller", &[controller.input_topic()])?;
    controller.run(inbound).await;
    Ok(())
}

pub async fn run_dashboard<B: Bus>(config: &Config, bus: B) -> Result<()> {
    let inbound = bus.subscribe_to("dashboard", &[config.topics.summary.as_str()])?;
    Dashboard::new()
        .run(inbound, config.dashboard.refresh_interval())
        .await;
    Ok(())
}

/// Every component in one process. Consumers subscribe before the sensors
/// start so the first readings are not missed.
pub async fn run_all<B: Bus>(config: &Config, bus: B) -> Result<()> {
    let gateway = Gateway::new(config, bus.clone())?;
    let gateway_in = bus.subscribe_to("gateway", &gateway.input_topics())?;

    let controller = Controller::new(config, bus.clone())?;
    let controller_in = bus.subscribe_to("controller", &[controller.input_topic()])?;

    let dashboard_in = bus.subscribe_to("dashboard", &[config.topics.summary.as_str()])?;
    let refresh = config.dashboard.refresh_interval();

    let mut tasks = vec![
        tokio::spawn(gateway.run(gateway_in)),
        tokio::spawn(controller.run(controller_in)),
        tokio::spawn(Dashboard::new().run(dashboard_in, refresh)),
    ];
    tasks.extend(spawn_simulators(config, bus));
    info!(tasks = tasks.len(), "traffic system started");

    wait_for(tasks).await;
    Ok(())
}

async fn wait_for(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "component task failed");
        }
    }
}

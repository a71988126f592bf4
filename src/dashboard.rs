//! Terminal dashboard for the final summaries.

use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{info, warn};

use crate::bus::BusMessage;
use crate::ingest::spawn_ingestion;
use crate::messages::Summary;
use crate::model::Lane;

const PROGRESS_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardStats {
    /// Number of green-lane changes seen.
    pub total_cycles: u64,
    /// Inactive to active emergency transitions.
    pub emergency_events: u64,
    pub lane1_total_green: u64,
    pub lane2_total_green: u64,
}

impl DashboardStats {
    pub fn total_green(&self, lane: Lane) -> u64 {
        match lane {
            Lane::Lane1 => self.lane1_total_green,
            Lane::Lane2 => self.lane2_total_green,
        }
    }
}

#[derive(Debug, Default)]
pub struct Dashboard {
    stats: DashboardStats,
    current_green: Option<Lane>,
    green_started: Option<Instant>,
    current_duration: u32,
    emergency_active: bool,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &DashboardStats {
        &self.stats
    }

    /// Folds the latest summary into the cycle and emergency statistics.
    pub fn observe(&mut self, summary: &Summary, now: Instant) {
        if self.current_green != Some(summary.green_light) {
            self.stats.total_cycles += 1;
            self.current_green = Some(summary.green_light);
            self.green_started = Some(now);
            self.current_duration = summary.green_duration;

            let total = match summary.green_light {
                Lane::Lane1 => &mut self.stats.lane1_total_green,
                Lane::Lane2 => &mut self.stats.lane2_total_green,
            };
            *total += u64::from(summary.green_duration);

            info!(
                cycle = self.stats.total_cycles,
                lane = %summary.green_light,
                duration_secs = summary.green_duration,
                "new green cycle"
            );
        }

        if summary.emergency && !self.emergency_active {
            self.stats.emergency_events += 1;
            warn!(
                event = self.stats.emergency_events,
                lane = ?summary.emergency_lane,
                "emergency event"
            );
        }
        self.emergency_active = summary.emergency;
    }

    /// Green time left in the current phase, never negative.
    pub fn remaining(&self, now: Instant) -> Duration {
        let Some(started) = self.green_started else {
            return Duration::ZERO;
        };
        let total = Duration::from_secs(u64::from(self.current_duration));
        total.saturating_sub(now.saturating_duration_since(started))
    }

    pub fn render(&self, summary: &Summary, now: Instant, updated_at: DateTime<Local>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "==================== SMART TRAFFIC CONTROL ====================");

        for lane in Lane::ALL {
            let (ir, vehicles, confidence) = match lane {
                Lane::Lane1 => (summary.lane1_ir, summary.lane1_vehicles, summary.lane1_confidence),
                Lane::Lane2 => (summary.lane2_ir, summary.lane2_vehicles, summary.lane2_confidence),
            };
            let light = if summary.green_light == lane { "GREEN" } else { "RED" };
            let _ = writeln!(
                out,
                "{lane:<8} [{light:^5}]  vehicles: {vehicles:>3}  IR: {}  confidence: {:>3.0}%",
                u8::from(ir),
                confidence * 100.0,
            );
        }

        let remaining = self.remaining(now).as_secs_f64();
        let _ = writeln!(
            out,
            "Green light: {}  {remaining:.1} / {} seconds  [{}]",
            summary.green_light,
            self.current_duration,
            progress_bar(remaining, self.current_duration),
        );

        match (summary.emergency, summary.emergency_lane) {
            (true, Some(lane)) => {
                let _ = writeln!(out, "Emergency: ACTIVE -> green given to {lane}");
            }
            (true, None) => {
                let _ = writeln!(out, "Emergency: ACTIVE (lane unknown)");
            }
            (false, _) => {
                let _ = writeln!(out, "Emergency: NONE");
            }
        }

        let _ = writeln!(
            out,
            "Cycles: {}  Emergencies: {}  Lane 1 green: {}s  Lane 2 green: {}s  Confidence: {:.0}%",
            self.stats.total_cycles,
            self.stats.emergency_events,
            self.stats.lane1_total_green,
            self.stats.lane2_total_green,
            summary.average_confidence * 100.0,
        );
        let _ = write!(out, "Last update: {}", updated_at.format("%H:%M:%S"));
        out
    }

    pub async fn run(mut self, inbound: mpsc::Receiver<BusMessage>, refresh: Duration) {
        let (tx, rx) = watch::channel(None::<Summary>);
        let _ingestion = spawn_ingestion(inbound, tx, |latest: &mut Option<Summary>, message| {
            match serde_json::from_slice::<Summary>(&message.payload) {
                Ok(summary) => *latest = Some(summary),
                Err(e) => warn!(topic = %message.topic, error = %e, "discarding summary"),
            }
        });

        let clear_screen = std::io::stdout().is_terminal();
        info!(refresh_ms = refresh.as_millis() as u64, "dashboard started");

        let mut interval = time::interval(refresh);
        loop {
            interval.tick().await;

            let latest = rx.borrow().clone();
            let now = Instant::now();
            let panel = match &latest {
                Some(summary) => {
                    self.observe(summary, now);
                    self.render(summary, now, Local::now())
                }
                None => "Waiting for the first summary...".to_string(),
            };

            let mut stdout = std::io::stdout().lock();
            let written = if clear_screen {
                writeln!(stdout, "\x1B[2J\x1B[H{panel}")
            } else {
                writeln!(stdout, "{panel}")
            };
            if let Err(e) = written.and_then(|()| stdout.flush()) {
                warn!(error = %e, "failed to draw dashboard");
            }
        }
    }
}

fn progress_bar(remaining_secs: f64, duration_secs: u32) -> String {
    let filled = if duration_secs == 0 {
        0
    } else {
        let fraction = (remaining_secs / f64::from(duration_secs)).clamp(0.0, 1.0);
        (fraction * PROGRESS_WIDTH as f64).round() as usize
    };
    format!("{}{}", "#".repeat(filled), "-".repeat(PROGRESS_WIDTH - filled))
}

/// Periodic human-readable report of the latest readings
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;

use crate::models::Snapshot;
use crate::sensor::RunnerHandle;
use crate::utils::{format_datetime, local_now};

pub struct ConsoleReporter {
    sources: Vec<watch::Receiver<Option<Snapshot>>>,
    period: Duration,
}

impl ConsoleReporter {
    pub fn new(sources: Vec<watch::Receiver<Option<Snapshot>>>, period: Duration) -> Self {
        Self { sources, period }
    }

    /// Print a report every period until stopped. Only the last published
    /// snapshot of each runner is read.
    pub async fn run(self, stop: RunnerHandle) {
        while stop.is_running() {
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = stop.wait() => break,
            }
            println!("{}", self.render(local_now()));
        }
    }

    fn render(&self, now: OffsetDateTime) -> String {
        let mut report = format_datetime(&now);
        for source in &self.sources {
            if let Some(snapshot) = source.borrow().as_ref() {
                report.push('\n');
                report.push_str(&format_snapshot(snapshot));
            }
        }
        report.push('\n');
        report
    }
}

/// `BME280i2c@0x76: in_temp 21.80: in_press 1007.00: in_humi 45.12`
pub fn format_snapshot(snapshot: &Snapshot) -> String {
    let values = snapshot
        .values
        .iter()
        .map(|v| format!(" {} {:.2}", v.tag, v.value))
        .collect::<Vec<_>>()
        .join(":");
    format!("{}:{}", snapshot.sensor, values)
}

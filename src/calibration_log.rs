/// Calibration capture: averaged raw readings appended to a CSV file, used to
/// derive slope/offset coefficients against a reference thermometer.
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::models::{DeviceReading, SensorSpec};
use crate::sensor::{Driver, RunnerHandle};
use crate::utils::{format_csv_time, local_now, mean};

pub const SAMPLES_PER_ROW: usize = 10;
pub const ROW_PERIOD: Duration = Duration::from_secs(5);

pub struct CalibrationCapture {
    sensors: Vec<(SensorSpec, Box<dyn Driver>)>,
    /// Millidegree file of the reference thermometer. Without one the
    /// reference temperature has to be logged separately and joined on `time`.
    reference: Option<PathBuf>,
    samples_per_row: usize,
    period: Duration,
}

impl CalibrationCapture {
    pub fn new(sensors: Vec<(SensorSpec, Box<dyn Driver>)>, reference: Option<PathBuf>) -> Self {
        Self {
            sensors,
            reference,
            samples_per_row: SAMPLES_PER_ROW,
            period: ROW_PERIOD,
        }
    }

    pub fn header(&self) -> String {
        let mut columns = vec!["time".to_string()];
        if self.reference.is_some() {
            columns.push("reference temp [°C]".to_string());
        }
        for (spec, _) in &self.sensors {
            let label = spec.label();
            columns.push(format!("{} temp [°C]", label));
            columns.push(format!("{} pressure [hPa]", label));
            if spec.kind.has_humidity() {
                columns.push(format!("{} humidity [%]", label));
            }
        }
        columns.join(",")
    }

    /// Sample the reference and every sensor `samples_per_row` times and
    /// build one CSV row: mean temperatures, last pressure and humidity.
    /// Failed samples are left out; a source without any good sample gets
    /// empty cells.
    pub async fn capture_row(&mut self) -> String {
        let mut cells = vec![format_csv_time(&local_now())];

        if let Some(path) = &self.reference {
            let mut temperatures = Vec::with_capacity(self.samples_per_row);
            for _ in 0..self.samples_per_row {
                match read_reference(path).await {
                    Ok(t) => temperatures.push(t),
                    Err(e) => warn!("Reference {}: read failed: {}", path.display(), e),
                }
            }
            cells.push(fmt_cell(mean(&temperatures)));
        }

        for (spec, driver) in self.sensors.iter_mut() {
            let mut temperatures = Vec::with_capacity(self.samples_per_row);
            let mut last: Option<DeviceReading> = None;

            for _ in 0..self.samples_per_row {
                match driver.sample().await {
                    Ok(reading) => {
                        temperatures.push(reading.temperature);
                        last = Some(reading);
                    }
                    Err(e) => warn!("Sensor {}: calibration sample failed: {}", spec.label(), e),
                }
            }

            cells.push(fmt_cell(mean(&temperatures)));
            cells.push(fmt_cell(last.and_then(|r| r.pressure)));
            if spec.kind.has_humidity() {
                cells.push(fmt_cell(last.and_then(|r| r.humidity)));
            }
        }

        cells.join(",")
    }

    /// Append a header and then one row per period to `path` until stopped
    pub async fn run(mut self, path: &Path, stop: RunnerHandle) -> std::io::Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{}\n", self.header()).as_bytes())
            .await?;
        info!("Writing calibration data to {}", path.display());
        if self.reference.is_none() {
            warn!("No [capture].reference configured; log the reference temperature separately");
        }

        let mut rows = 0;
        while stop.is_running() {
            let started = Instant::now();
            let row = self.capture_row().await;
            println!("{}", row);
            file.write_all(format!("{}\n", row).as_bytes()).await?;
            file.flush().await?;
            rows += 1;

            tokio::select! {
                _ = tokio::time::sleep_until(started + self.period) => {}
                _ = stop.wait() => break,
            }
        }

        info!("Calibration capture finished after {} rows", rows);
        Ok(rows)
    }
}

/// Linux thermal/w1_therm format: integer millidegrees Celsius
async fn read_reference(path: &Path) -> std::io::Result<f64> {
    let text = tokio::fs::read_to_string(path).await?;
    let millidegrees: i64 = text
        .trim()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(millidegrees as f64 / 1000.0)
}

fn fmt_cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_default()
}

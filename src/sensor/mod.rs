pub mod bmx280;
pub mod driver;
pub mod runner;
pub mod simulated;

use std::sync::Arc;

use log::{error, info};

use crate::config::AppConfig;
use crate::database::{Backend, BatchWriter};
use crate::error::DriverError;
use crate::models::SensorSpec;

pub use driver::Driver;
pub use runner::{RunnerHandle, RunnerSummary, SensorRunner};

/// Open and initialise the driver for one sensor
pub async fn open_driver(spec: &SensorSpec, simulated: bool) -> Result<Box<dyn Driver>, DriverError> {
    let mut driver: Box<dyn Driver> = if simulated {
        Box::new(simulated::SimulatedDriver::new(spec.kind, spec.address))
    } else {
        Box::new(bmx280::Bmx280Driver::open(spec)?)
    };
    driver.load_calibration().await?;
    Ok(driver)
}

/// Validate every `[[sensor]]` section and open its driver.
///
/// A section that fails validation or whose device cannot be initialised is
/// logged and left out; the remaining sensors are returned in file order.
pub async fn build_sensors(config: &AppConfig) -> Vec<(SensorSpec, Box<dyn Driver>)> {
    let mut sensors = Vec::with_capacity(config.sensors.len());

    for (index, section) in config.sensors.iter().enumerate() {
        let spec = match section.to_spec() {
            Ok(spec) => spec,
            Err(e) => {
                error!(
                    "Configuration for sensor{} ({}) rejected, skipping: {}",
                    index,
                    section.kind_name(),
                    e
                );
                continue;
            }
        };

        match open_driver(&spec, config.mode.no_sensors).await {
            Ok(driver) => {
                info!("Starting {}", spec.label());
                sensors.push((spec, driver));
            }
            Err(e) => error!("Sensor {} could not be initialised, skipping: {}", spec.label(), e),
        }
    }

    info!("{} of {} configured sensors active", sensors.len(), config.sensors.len());
    sensors
}

/// One runner per active sensor. Without a backend the runners only publish
/// their latest values (console mode).
pub async fn build_runners(
    config: &AppConfig,
    backend: Option<Arc<dyn Backend>>,
) -> Vec<SensorRunner> {
    let identity = Arc::new(config.identity());

    build_sensors(config)
        .await
        .into_iter()
        .map(|(spec, driver)| {
            let writer = backend
                .as_ref()
                .map(|b| BatchWriter::new(Arc::clone(b), config.database.max_pending));
            SensorRunner::new(spec, Arc::clone(&identity), driver, writer)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MIXED_CONFIG: &str = r#"
        [device]
        id = "meteo-01"
        location = "garden"

        [mode]
        no_sensors = true

        [database]
        table = "measurements"

        [[sensor]]
        type = "BME280i2c"
        address = "0x76"
        sampletime = 1
        temperature = "in_temp"
        pressure = "in_press"
        humidity = "in_humi"

        [[sensor]]
        type = "XYZ9000"
        address = "0x10"
        sampletime = 1

        [[sensor]]
        type = "BMP280i2c"
        address = "0x77"
        sampletime = 5
        temperature = "out_temp"
        pressure = "out_press"
    "#;

    #[tokio::test]
    async fn test_unknown_kind_is_skipped() {
        let config = AppConfig::from_toml(MIXED_CONFIG).unwrap();

        let runners = build_runners(&config, None).await;

        let labels: Vec<&str> = runners.iter().map(SensorRunner::label).collect();
        assert_eq!(labels, vec!["BME280i2c@0x76", "BMP280i2c@0x77"]);
    }
}

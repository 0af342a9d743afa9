/// Stand-in driver for hosts without a sensor bus (`no_sensors = true`)
use async_trait::async_trait;

use crate::error::DriverError;
use crate::models::{DeviceReading, SensorKind};
use crate::sensor::driver::Driver;

pub struct SimulatedDriver {
    kind: SensorKind,
    seed: f64,
    samples: u64,
}

impl SimulatedDriver {
    pub fn new(kind: SensorKind, address: u16) -> Self {
        Self {
            kind,
            // Different addresses give visibly different series
            seed: f64::from(address % 16),
            samples: 0,
        }
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    async fn load_calibration(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn sample(&mut self) -> Result<DeviceReading, DriverError> {
        let phase = (self.samples as f64 / 60.0 + self.seed).sin();
        self.samples += 1;

        Ok(DeviceReading {
            temperature: 21.0 + 2.5 * phase,
            pressure: Some(1013.25 + 4.0 * phase),
            humidity: self.kind.has_humidity().then(|| 45.0 - 10.0 * phase),
        })
    }
}

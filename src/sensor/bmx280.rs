/// BME280/BMP280 access over the Linux I2C character device
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bme280::i2c::BME280;
use linux_embedded_hal::{Delay, I2cdev};
use log::debug;

use crate::error::DriverError;
use crate::models::{DeviceReading, SensorKind, SensorSpec};
use crate::sensor::driver::Driver;

// The bme280 crate reports pressure in Pa
const PA_PER_HPA: f64 = 100.0;

pub struct Bmx280Driver {
    kind: SensorKind,
    label: String,
    device: Arc<Mutex<BME280<I2cdev>>>,
}

impl Bmx280Driver {
    /// Open `/dev/i2c-<port>` for the sensor. Does not touch the device yet.
    pub fn open(spec: &SensorSpec) -> Result<Self, DriverError> {
        let path = format!("/dev/i2c-{}", spec.i2c_port);
        let address = match u8::try_from(spec.address) {
            Ok(address) if address <= 0x7F => address,
            _ => {
                return Err(DriverError::BusOpen {
                    path,
                    reason: format!("{:#x} is not a 7-bit I2C address", spec.address),
                })
            }
        };
        let bus = I2cdev::new(&path).map_err(|e| DriverError::BusOpen {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            kind: spec.kind,
            label: spec.label(),
            device: Arc::new(Mutex::new(BME280::new(bus, address))),
        })
    }
}

#[async_trait]
impl Driver for Bmx280Driver {
    async fn load_calibration(&mut self) -> Result<(), DriverError> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || {
            let mut device = device.lock().map_err(|_| DriverError::Poisoned)?;
            device
                .init(&mut Delay)
                .map_err(|e| DriverError::Calibration(format!("{:?}", e)))
        })
        .await
        .map_err(|e| DriverError::Task(e.to_string()))??;

        debug!("Loaded calibration parameters for {}", self.label);
        Ok(())
    }

    async fn sample(&mut self) -> Result<DeviceReading, DriverError> {
        let device = Arc::clone(&self.device);
        let raw = tokio::task::spawn_blocking(move || {
            let mut device = device.lock().map_err(|_| DriverError::Poisoned)?;
            device
                .measure(&mut Delay)
                .map(|m| (m.temperature, m.pressure, m.humidity))
                .map_err(|e| DriverError::Sample(format!("{:?}", e)))
        })
        .await
        .map_err(|e| DriverError::Task(e.to_string()))??;

        let (temperature, pressure, humidity) = raw;
        Ok(DeviceReading {
            temperature: f64::from(temperature),
            pressure: Some(f64::from(pressure) / PA_PER_HPA),
            humidity: self.kind.has_humidity().then(|| f64::from(humidity)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sensor::runner::tests::spec;

    #[test]
    fn test_wide_address_rejected_before_bus_open() {
        let spec = spec(SensorKind::TemperaturePressure, 0x176, Duration::from_secs(1));

        match Bmx280Driver::open(&spec) {
            Err(DriverError::BusOpen { path, reason }) => {
                assert_eq!(path, "/dev/i2c-1");
                assert!(reason.contains("7-bit"));
            }
            _ => panic!("expected BusOpen for address 0x176"),
        }
    }
}

use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::ConfigError;

/// Supported device families. Both speak the same register protocol and differ
/// only in the channels they provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// BME280: temperature, pressure and humidity
    TemperatureHumidityPressure,
    /// BMP280: temperature and pressure
    TemperaturePressure,
}

impl SensorKind {
    pub fn channels(self) -> &'static [Channel] {
        match self {
            SensorKind::TemperatureHumidityPressure => {
                &[Channel::Temperature, Channel::Pressure, Channel::Humidity]
            }
            SensorKind::TemperaturePressure => &[Channel::Temperature, Channel::Pressure],
        }
    }

    pub fn has_humidity(self) -> bool {
        matches!(self, SensorKind::TemperatureHumidityPressure)
    }
}

impl std::str::FromStr for SensorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bme280i2c" | "bme280" => Ok(SensorKind::TemperatureHumidityPressure),
            "bmp280i2c" | "bmp280" => Ok(SensorKind::TemperaturePressure),
            _ => Err(ConfigError::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::TemperatureHumidityPressure => write!(f, "BME280i2c"),
            SensorKind::TemperaturePressure => write!(f, "BMP280i2c"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Temperature,
    Pressure,
    Humidity,
}

/// Linear correction for one channel: `raw * slope + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    pub slope: f64,
    pub offset: f64,
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    pub temperature: ChannelCalibration,
    pub pressure: ChannelCalibration,
    /// Humidity output is already compensated by the device, only shifted
    pub humidity_offset: f64,
}

/// Tag names written as `value_type` for each channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTags {
    pub temperature: String,
    pub pressure: String,
    pub humidity: Option<String>,
}

impl ChannelTags {
    pub fn tag(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Temperature => Some(&self.temperature),
            Channel::Pressure => Some(&self.pressure),
            Channel::Humidity => self.humidity.as_deref(),
        }
    }
}

/// Validated, immutable configuration of one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub kind: SensorKind,
    pub address: u16,
    pub i2c_port: u8,
    pub interval: Duration,
    pub calibration: Calibration,
    pub tags: ChannelTags,
}

impl SensorSpec {
    /// Short name used in log lines, e.g. `BME280i2c@0x76`
    pub fn label(&self) -> String {
        format!("{}@{:#04x}", self.kind, self.address)
    }
}

/// Raw compensated output of one sample call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReading {
    /// °C
    pub temperature: f64,
    /// hPa
    pub pressure: Option<f64>,
    /// %RH
    pub humidity: Option<f64>,
}

/// Identity stamped onto every row
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub id: String,
    pub location: String,
}

/// One calibrated channel value, in channel order
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedValue {
    pub tag: String,
    pub value: f64,
}

/// One persistable data point
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub device_id: String,
    pub location: String,
    pub value_type: String,
    pub value: f64,
    pub time: OffsetDateTime,
}

/// Latest values published by a runner for the console reporter
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub sensor: String,
    pub values: Vec<CalibratedValue>,
}

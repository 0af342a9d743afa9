/// Linear per-channel correction of raw device readings
use time::OffsetDateTime;

use crate::models::{
    CalibratedValue, Channel, DeviceIdentity, DeviceReading, Measurement, SensorSpec,
};

/// Apply the sensor's calibration to a raw reading.
///
/// Yields one value per channel of the sensor kind, in channel order
/// (temperature, pressure, humidity). Temperature and pressure use
/// `raw * slope + offset`, humidity only `raw + offset`. A channel the
/// device did not report is left out.
pub fn calibrate(reading: &DeviceReading, spec: &SensorSpec) -> Vec<CalibratedValue> {
    let cal = &spec.calibration;

    spec.kind
        .channels()
        .iter()
        .filter_map(|&channel| {
            let value = match channel {
                Channel::Temperature => {
                    reading.temperature * cal.temperature.slope + cal.temperature.offset
                }
                Channel::Pressure => {
                    reading.pressure? * cal.pressure.slope + cal.pressure.offset
                }
                Channel::Humidity => reading.humidity? + cal.humidity_offset,
            };
            let tag = spec.tags.tag(channel)?;
            Some(CalibratedValue {
                tag: tag.to_string(),
                value,
            })
        })
        .collect()
}

/// Stamp calibrated values with device identity and sample time
pub fn to_measurements(
    values: &[CalibratedValue],
    identity: &DeviceIdentity,
    time: OffsetDateTime,
) -> Vec<Measurement> {
    values
        .iter()
        .map(|v| Measurement {
            device_id: identity.id.clone(),
            location: identity.location.clone(),
            value_type: v.tag.clone(),
            value: v.value,
            time,
        })
        .collect()
}

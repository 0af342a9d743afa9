use async_trait::async_trait;

use crate::error::DriverError;
use crate::models::DeviceReading;

/// A device bound to its bus handle and address.
///
/// Implementations own their bus resource; callers only ever ask for a
/// compensated reading.
#[async_trait]
pub trait Driver: Send {
    /// One-time setup: chip check and factory trimming parameters
    async fn load_calibration(&mut self) -> Result<(), DriverError>;

    /// Take one forced-mode measurement
    async fn sample(&mut self) -> Result<DeviceReading, DriverError>;
}


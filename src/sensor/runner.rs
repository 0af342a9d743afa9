/// Per-sensor sample → calibrate → buffer → flush loop
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::calibration::{calibrate, to_measurements};
use crate::database::BatchWriter;
use crate::models::{DeviceIdentity, SensorSpec, Snapshot};
use crate::sensor::driver::Driver;

/// Stop switch for one runner. Cloneable; does not wait for the runner.
#[derive(Clone)]
pub struct RunnerHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl RunnerHandle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // notify_one keeps a permit if the runner is not waiting right now
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves on the next `stop()`, or at once if one is already pending
    pub async fn wait(&self) {
        self.wake.notified().await
    }
}

impl Default for RunnerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// What a runner did before it exited
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSummary {
    pub sensor: String,
    pub cycles: u64,
    pub sample_failures: u64,
    pub flush_failures: u64,
    /// Measurements still unwritten after the final flush
    pub pending: usize,
    pub dropped: u64,
}

struct RunnerState {
    next_due: Instant,
    cycles: u64,
    sample_failures: u64,
    flush_failures: u64,
}

pub struct SensorRunner {
    spec: SensorSpec,
    label: String,
    identity: Arc<DeviceIdentity>,
    driver: Box<dyn Driver>,
    /// `None` in console mode: values are only published, never stored
    writer: Option<BatchWriter>,
    latest: watch::Sender<Option<Snapshot>>,
    handle: RunnerHandle,
}

impl SensorRunner {
    pub fn new(
        spec: SensorSpec,
        identity: Arc<DeviceIdentity>,
        driver: Box<dyn Driver>,
        writer: Option<BatchWriter>,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            label: spec.label(),
            spec,
            identity,
            driver,
            writer,
            latest,
            handle: RunnerHandle::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> RunnerHandle {
        self.handle.clone()
    }

    /// Latest calibrated values, for readers that must not touch the runner
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.latest.subscribe()
    }

    /// Run cycles every `interval` until stopped, then flush once more.
    ///
    /// The next cycle is due one interval after the previous cycle started.
    /// An overrunning cycle is followed immediately by the next one; missed
    /// intervals are not made up. A stop request interrupts only the wait,
    /// never a cycle in progress.
    pub async fn run(mut self) -> RunnerSummary {
        info!("Sensor {} is running", self.label);

        let mut state = RunnerState {
            next_due: Instant::now(),
            cycles: 0,
            sample_failures: 0,
            flush_failures: 0,
        };

        while self.handle.is_running() {
            tokio::select! {
                _ = tokio::time::sleep_until(state.next_due) => {}
                _ = self.handle.wait() => continue,
            }
            if !self.handle.is_running() {
                break;
            }

            let started = Instant::now();
            self.cycle(&mut state).await;
            state.next_due = started + self.spec.interval;
        }

        self.finish(state).await
    }

    async fn cycle(&mut self, state: &mut RunnerState) {
        state.cycles += 1;

        let reading = match self.driver.sample().await {
            Ok(reading) => reading,
            Err(e) => {
                state.sample_failures += 1;
                error!("Sensor {}: sample failed, skipping cycle: {}", self.label, e);
                return;
            }
        };

        let values = calibrate(&reading, &self.spec);
        let now = OffsetDateTime::now_utc();

        if let Some(writer) = self.writer.as_mut() {
            writer.push(to_measurements(&values, &self.identity, now));
            match writer.flush().await {
                Ok(written) => debug!("Sensor {}: stored {} measurements", self.label, written),
                Err(e) => {
                    state.flush_failures += 1;
                    warn!(
                        "Sensor {}: flush failed, retaining {} measurements: {}",
                        self.label,
                        writer.pending(),
                        e
                    );
                }
            }
        }

        self.latest.send_replace(Some(Snapshot {
            sensor: self.label.clone(),
            values,
        }));
    }

    async fn finish(mut self, state: RunnerState) -> RunnerSummary {
        let (pending, dropped) = match self.writer.as_mut() {
            Some(writer) => {
                if writer.pending() > 0 {
                    if let Err(e) = writer.flush().await {
                        error!(
                            "Sensor {}: final flush failed, {} measurements not stored: {}",
                            self.label,
                            writer.pending(),
                            e
                        );
                    }
                }
                (writer.pending(), writer.dropped())
            }
            None => (0, 0),
        };

        info!(
            "Sensor {} closed after {} cycles",
            self.label, state.cycles
        );

        RunnerSummary {
            sensor: self.label,
            cycles: state.cycles,
            sample_failures: state.sample_failures,
            flush_failures: state.flush_failures,
            pending,
            dropped,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::database::buffer::tests::MemoryBackend;
    use crate::error::DriverError;
    use crate::models::{Calibration, ChannelTags, DeviceReading, SensorKind};

    /// Driver with a shared sample counter, optional latency and failures
    pub(crate) struct ScriptedDriver {
        pub kind: SensorKind,
        pub samples: Arc<AtomicUsize>,
        pub fail_on: Vec<usize>,
        pub latency: Duration,
    }

    impl ScriptedDriver {
        pub fn new(kind: SensorKind) -> (Self, Arc<AtomicUsize>) {
            let samples = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    kind,
                    samples: samples.clone(),
                    fail_on: Vec::new(),
                    latency: Duration::ZERO,
                },
                samples,
            )
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        async fn load_calibration(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn sample(&mut self) -> Result<DeviceReading, DriverError> {
            let n = self.samples.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.fail_on.contains(&n) {
                return Err(DriverError::Sample("bus NACK".into()));
            }
            Ok(DeviceReading {
                temperature: 20.0 + n as f64,
                pressure: Some(1000.0),
                humidity: self.kind.has_humidity().then_some(50.0),
            })
        }
    }

    pub(crate) fn spec(kind: SensorKind, address: u16, interval: Duration) -> SensorSpec {
        SensorSpec {
            kind,
            address,
            i2c_port: 1,
            interval,
            calibration: Calibration::default(),
            tags: ChannelTags {
                temperature: format!("temp_{:x}", address),
                pressure: format!("press_{:x}", address),
                humidity: kind
                    .has_humidity()
                    .then(|| format!("humi_{:x}", address)),
            },
        }
    }

    pub(crate) fn identity() -> Arc<DeviceIdentity> {
        Arc::new(DeviceIdentity {
            id: "meteo-01".into(),
            location: "garden".into(),
        })
    }

    fn runner(
        driver: ScriptedDriver,
        interval: Duration,
        backend: &Arc<MemoryBackend>,
    ) -> SensorRunner {
        let spec = spec(driver.kind, 0x76, interval);
        let writer = BatchWriter::new(backend.clone(), None);
        SensorRunner::new(spec, identity(), Box::new(driver), Some(writer))
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_cadences() {
        let backend = Arc::new(MemoryBackend::default());

        let (fast_driver, fast_samples) = ScriptedDriver::new(SensorKind::TemperatureHumidityPressure);
        let (slow_driver, slow_samples) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let fast = SensorRunner::new(
            spec(fast_driver.kind, 0x76, Duration::from_secs(1)),
            identity(),
            Box::new(fast_driver),
            Some(BatchWriter::new(backend.clone(), None)),
        );
        let slow = SensorRunner::new(
            spec(slow_driver.kind, 0x77, Duration::from_secs(5)),
            identity(),
            Box::new(slow_driver),
            Some(BatchWriter::new(backend.clone(), None)),
        );
        let handles = [fast.handle(), slow.handle()];
        let fast_task = tokio::spawn(fast.run());
        let slow_task = tokio::spawn(slow.run());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        handles.iter().for_each(RunnerHandle::stop);

        let fast_summary = fast_task.await.unwrap();
        let slow_summary = slow_task.await.unwrap();

        assert_eq!(fast_summary.cycles, 11);
        assert_eq!(slow_summary.cycles, 3);
        assert_eq!(fast_samples.load(Ordering::SeqCst), 11);
        assert_eq!(slow_samples.load(Ordering::SeqCst), 3);
        assert_eq!(backend.stored().len(), 11 * 3 + 3 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_does_not_delay_other_sensor() {
        let stalled = Arc::new(MemoryBackend::slow(Duration::from_secs(3), 100));
        let healthy = Arc::new(MemoryBackend::default());

        let (stuck_driver, _) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let (steady_driver, steady_samples) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let stuck = SensorRunner::new(
            spec(stuck_driver.kind, 0x76, Duration::from_secs(1)),
            identity(),
            Box::new(stuck_driver),
            Some(BatchWriter::new(stalled.clone(), None)),
        );
        let steady = SensorRunner::new(
            spec(steady_driver.kind, 0x77, Duration::from_secs(1)),
            identity(),
            Box::new(steady_driver),
            Some(BatchWriter::new(healthy.clone(), None)),
        );
        let handles = [stuck.handle(), steady.handle()];
        let stuck_task = tokio::spawn(stuck.run());
        let steady_task = tokio::spawn(steady.run());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        handles.iter().for_each(RunnerHandle::stop);

        let stuck_summary = stuck_task.await.unwrap();
        let steady_summary = steady_task.await.unwrap();

        assert_eq!(steady_summary.cycles, 11);
        assert_eq!(steady_samples.load(Ordering::SeqCst), 11);
        assert_eq!(healthy.stored().len(), 11 * 2);

        // Each stuck cycle overruns its interval by the 3 s write: 0, 3, 6, 9
        assert_eq!(stuck_summary.cycles, 4);
        assert_eq!(stuck_summary.flush_failures, 4);
        assert_eq!(stuck_summary.pending, 4 * 2);
        assert!(stalled.stored().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cycles_after_stop() {
        let backend = Arc::new(MemoryBackend::default());
        let (driver, samples) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let runner = runner(driver, Duration::from_secs(10), &backend);
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_secs(15)).await;
        handle.stop();
        let summary = task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(samples.load(Ordering::SeqCst), 2);
        assert_eq!(backend.stored().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_cycle_completes_on_stop() {
        let backend = Arc::new(MemoryBackend::default());
        let (mut driver, _) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        driver.latency = Duration::from_secs(2);
        let runner = runner(driver, Duration::from_secs(10), &backend);
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        let summary = task.await.unwrap();

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(backend.stored().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_run() {
        let backend = Arc::new(MemoryBackend::default());
        let (driver, samples) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let runner = runner(driver, Duration::from_secs(1), &backend);
        runner.handle().stop();

        let summary = runner.run().await;

        assert_eq!(summary.cycles, 0);
        assert_eq!(samples.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_failure_skips_cycle_only() {
        let backend = Arc::new(MemoryBackend::default());
        let (mut driver, _) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        driver.fail_on = vec![1];
        let runner = runner(driver, Duration::from_secs(1), &backend);
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.stop();
        let summary = task.await.unwrap();

        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.sample_failures, 1);
        let temps: Vec<f64> = backend
            .stored()
            .iter()
            .filter(|m| m.value_type.starts_with("temp"))
            .map(|m| m.value)
            .collect();
        assert_eq!(temps, vec![20.0, 22.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_outage_loses_nothing() {
        let backend = Arc::new(MemoryBackend::failing(2));
        let (driver, _) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let runner = runner(driver, Duration::from_secs(1), &backend);
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.stop();
        let summary = task.await.unwrap();

        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.flush_failures, 2);
        assert_eq!(summary.pending, 0);

        let stored = backend.stored();
        assert_eq!(stored.len(), 6);
        let temps: Vec<f64> = stored
            .iter()
            .filter(|m| m.value_type.starts_with("temp"))
            .map(|m| m.value)
            .collect();
        assert_eq!(temps, vec![20.0, 21.0, 22.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_flush_on_stop() {
        let backend = Arc::new(MemoryBackend::failing(1));
        let (driver, _) = ScriptedDriver::new(SensorKind::TemperaturePressure);
        let runner = runner(driver, Duration::from_secs(10), &backend);
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        let summary = task.await.unwrap();

        assert_eq!(summary.flush_failures, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(backend.stored().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_mode_publishes_without_storing() {
        let (driver, _) = ScriptedDriver::new(SensorKind::TemperatureHumidityPressure);
        let runner = SensorRunner::new(
            spec(driver.kind, 0x76, Duration::from_secs(1)),
            identity(),
            Box::new(driver),
            None,
        );
        let mut latest = runner.subscribe();
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        latest.changed().await.unwrap();
        let snapshot = latest.borrow().clone().unwrap();
        handle.stop();
        let summary = task.await.unwrap();

        assert_eq!(snapshot.sensor, "BME280i2c@0x76");
        assert_eq!(snapshot.values.len(), 3);
        assert_eq!(summary.pending, 0);
    }
}

mod calibration;
mod calibration_log;
mod config;
mod console;
mod database;
mod error;
mod lifecycle;
mod models;
mod sensor;
mod shutdown;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use calibration_log::CalibrationCapture;
use config::AppConfig;
use console::ConsoleReporter;
use database::{Backend, ConnectSettings, PostgresBackend};
use error::PersistenceError;
use lifecycle::Controller;
use sensor::{build_runners, build_sensors, RunnerHandle, SensorRunner};
use utils::{format_file_stamp, local_now};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Console,
    Silent,
    Calibrate,
}

fn run_mode(args: &[String], config: &AppConfig) -> RunMode {
    if args.iter().any(|a| a == "--calibrate") {
        RunMode::Calibrate
    } else if args.iter().any(|a| a == "-srv" || a == "--srv") || !config.mode.verbose {
        RunMode::Silent
    } else {
        RunMode::Console
    }
}

fn open_backend(config: &AppConfig) -> Result<Arc<dyn Backend>, PersistenceError> {
    let db = &config.database;
    let url = db.url.as_deref().ok_or(PersistenceError::MissingUrl)?;
    let settings = ConnectSettings::parse(url, db.connect_timeout(), db.write_timeout())?;
    Ok(Arc::new(PostgresBackend::new(settings, &db.table)))
}

async fn run_calibration(
    config: &AppConfig,
    stop: RunnerHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let sensors = build_sensors(config).await;
    let path = PathBuf::from(format!("calib_{}.txt", format_file_stamp(&local_now())));
    CalibrationCapture::new(sensors, config.capture.reference.clone())
        .run(&path, stop)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Subscribe to SIGINT/SIGTERM once, before anything starts
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        let _ = tx.send(());
    });
    let signal = async {
        let _ = rx.await;
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = run_mode(&args, &config);
    info!(
        "Starting {} ({}) in {:?} mode",
        config.device.id, config.device.location, mode
    );

    if mode == RunMode::Calibrate {
        let stop = RunnerHandle::new();
        let capture = run_calibration(&config, stop.clone());
        tokio::pin!(capture);
        tokio::select! {
            result = &mut capture => return result,
            _ = signal => stop.stop(),
        }
        return capture.await;
    }

    let (runners, reporter) = match mode {
        RunMode::Silent => {
            let backend = match open_backend(&config) {
                Ok(backend) => backend,
                Err(e) => {
                    error!("Failed to configure database: {}", e);
                    return Err(e.into());
                }
            };
            (build_runners(&config, Some(backend)).await, None)
        }
        _ => {
            let runners = build_runners(&config, None).await;
            let sources = runners.iter().map(SensorRunner::subscribe).collect();
            let period = Duration::from_secs(config.mode.report_interval_secs.max(1));
            (runners, Some(ConsoleReporter::new(sources, period)))
        }
    };

    let mut controller = Controller::new();
    controller.start(runners, reporter)?;

    let summaries = controller.run_until(signal).await?;
    for summary in &summaries {
        info!(
            "Sensor {}: {} cycles, {} failed samples, {} failed flushes, {} unstored, {} dropped",
            summary.sensor,
            summary.cycles,
            summary.sample_failures,
            summary.flush_failures,
            summary.pending,
            summary.dropped
        );
    }

    info!(
        "Program terminated ({:?}). Exiting gracefully.",
        controller.state()
    );
    Ok(())
}

/// Error types for the sampling, persistence and configuration layers
use thiserror::Error;

/// Bus or device communication failure. Recovered by skipping the cycle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("failed to open I2C bus {path}: {reason}")]
    BusOpen { path: String, reason: String },
    #[error("failed to load calibration parameters: {0}")]
    Calibration(String),
    #[error("sample failed: {0}")]
    Sample(String),
    #[error("device lock poisoned")]
    Poisoned,
    #[error("blocking bus task failed: {0}")]
    Task(String),
}

/// Backend unreachable or write rejected. Recovered by retaining the batch.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database URL not configured (set DATABASE_URL or [database].url)")]
    MissingUrl,
    #[error("invalid database URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("database did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}

/// Invalid configuration. Fatal for the file, or for a single sensor section.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown sensor kind {0:?}")]
    UnknownKind(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid bus address {0:?}")]
    InvalidAddress(String),
    #[error("sampling interval must be positive, got {0}")]
    InvalidInterval(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: crate::lifecycle::LifecycleState,
    },
}

/// Utility functions for time formatting and averaging
use time::{format_description, OffsetDateTime};

/// Local wall-clock time, or UTC when the local offset cannot be determined
/// (the offset lookup refuses to run in multi-threaded processes on some
/// platforms).
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Format a timestamp for human-readable output
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    format_with(dt, "[day].[month].[year] - [hour]:[minute]:[second]")
}

/// `YYYY-MM-DD HH:MM:SS`, used in CSV rows
pub fn format_csv_time(dt: &OffsetDateTime) -> String {
    format_with(dt, "[year]-[month]-[day] [hour]:[minute]:[second]")
}

/// `YYYYMMDD-HHMMSS`, used in file names
pub fn format_file_stamp(dt: &OffsetDateTime) -> String {
    format_with(dt, "[year][month][day]-[hour][minute][second]")
}

fn format_with(dt: &OffsetDateTime, description: &str) -> String {
    match format_description::parse(description) {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

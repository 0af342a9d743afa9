/// Database operations for storing calibrated measurements
use async_trait::async_trait;
use log::debug;
use tokio::time::timeout;

use crate::database::connection::{connect, ConnectSettings};
use crate::error::PersistenceError;
use crate::models::Measurement;

/// Destination for measurement rows.
///
/// `insert_rows` is all-or-nothing: on `Err` the caller must assume no row of
/// the slice was kept. Implementations are shared by every runner.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn insert_rows(&self, rows: &[Measurement]) -> Result<(), PersistenceError>;
}

/// PostgreSQL table with columns `dev_id, location, value, value_type, time`
pub struct PostgresBackend {
    settings: ConnectSettings,
    insert_sql: String,
}

impl PostgresBackend {
    pub fn new(settings: ConnectSettings, table: &str) -> Self {
        let insert_sql = format!(
            "INSERT INTO {}(dev_id, location, value, value_type, time)
             VALUES ($1, $2, $3, $4, $5)",
            quote_identifier(table)
        );
        Self {
            settings,
            insert_sql,
        }
    }

    async fn write(&self, rows: &[Measurement]) -> Result<(), PersistenceError> {
        let mut client = connect(&self.settings).await?;
        let transaction = client.transaction().await?;
        let statement = transaction.prepare(&self.insert_sql).await?;

        for row in rows {
            let inserted = transaction
                .execute(
                    &statement,
                    &[
                        &row.device_id,
                        &row.location,
                        &row.value,
                        &row.value_type,
                        &row.time,
                    ],
                )
                .await?;
            // A rule or trigger can swallow the insert without an error
            if inserted != 1 {
                return Err(PersistenceError::Rejected(format!(
                    "{} {} row not stored",
                    row.device_id, row.value_type
                )));
            }
        }

        transaction.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    /// Write every row inside one transaction. Dropping the transaction on an
    /// error path rolls it back, so nothing of a failed batch is committed.
    /// The whole write is bounded by the write timeout.
    async fn insert_rows(&self, rows: &[Measurement]) -> Result<(), PersistenceError> {
        if rows.is_empty() {
            return Ok(());
        }

        let deadline = self.settings.write_timeout;
        timeout(deadline, self.write(rows))
            .await
            .map_err(|_| PersistenceError::Timeout(deadline))??;
        debug!("Committed {} rows", rows.len());
        Ok(())
    }
}

/// Quote a table name as a SQL identifier; `schema.table` keeps its dot.
fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

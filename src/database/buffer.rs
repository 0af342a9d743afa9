/// Per-sensor pending batch with retain-on-failure flushing
use std::collections::VecDeque;
use std::sync::Arc;

use log::warn;

use crate::database::operations::Backend;
use crate::error::PersistenceError;
use crate::models::Measurement;

pub struct BatchWriter {
    backend: Arc<dyn Backend>,
    batch: VecDeque<Measurement>,
    max_pending: Option<usize>,
    dropped: u64,
}

impl BatchWriter {
    /// `max_pending = None` keeps everything until the backend recovers
    pub fn new(backend: Arc<dyn Backend>, max_pending: Option<usize>) -> Self {
        Self {
            backend,
            batch: VecDeque::new(),
            max_pending,
            dropped: 0,
        }
    }

    /// Append measurements in sample order. With a cap configured, the oldest
    /// pending measurements are dropped to make room.
    pub fn push(&mut self, measurements: impl IntoIterator<Item = Measurement>) {
        self.batch.extend(measurements);

        if let Some(cap) = self.max_pending {
            let excess = self.batch.len().saturating_sub(cap);
            if excess > 0 {
                self.batch.drain(..excess);
                self.dropped += excess as u64;
                warn!(
                    "Pending batch over cap of {}: dropped {} oldest measurements",
                    cap, excess
                );
            }
        }
    }

    /// Write the whole pending batch. Cleared only on success; on failure the
    /// batch is left exactly as it was.
    pub async fn flush(&mut self) -> Result<usize, PersistenceError> {
        if self.batch.is_empty() {
            return Ok(0);
        }

        let rows = self.batch.make_contiguous();
        self.backend.insert_rows(rows).await?;

        let written = self.batch.len();
        self.batch.clear();
        Ok(written)
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    #[cfg(test)]
    pub fn pending_rows(&self) -> impl Iterator<Item = &Measurement> {
        self.batch.iter()
    }

    /// Measurements discarded by the cap since start
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

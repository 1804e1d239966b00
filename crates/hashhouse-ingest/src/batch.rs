//! Row batching.
//!
//! The [`Batcher`] accumulates rows until the batch reaches its threshold,
//! then hands the whole batch to a [`BulkLoader`] and waits for it before
//! accepting more. It is owned by a single consumer, so no locking is needed.

use std::time::Instant;

use tracing::{error, info};

use crate::config::FlushFailurePolicy;
use crate::error::{IngestError, Result};
use crate::loader::BulkLoader;
use crate::row::Row;

/// Rows waiting to be loaded, in arrival order.
#[derive(Debug)]
pub struct Batch {
    rows: Vec<Row>,
    threshold: usize,
}

impl Batch {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            // Cap the up-front allocation; very large thresholds grow on demand.
            rows: Vec::with_capacity(threshold.min(65_536)),
            threshold,
        }
    }

    /// Append a row. Returns `true` once the batch is full.
    pub fn push(&mut self, row: Row) -> bool {
        self.rows.push(row);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Flush counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub rows_loaded: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub rows_failed: u64,
}

/// Accumulates rows and flushes full batches through a loader.
pub struct Batcher<L: BulkLoader> {
    batch: Batch,
    loader: L,
    policy: FlushFailurePolicy,
    stats: BatchStats,
}

impl<L: BulkLoader> Batcher<L> {
    pub fn new(loader: L, threshold: usize, policy: FlushFailurePolicy) -> Self {
        Self {
            batch: Batch::new(threshold),
            loader,
            policy,
            stats: BatchStats::default(),
        }
    }

    /// Add a row, flushing if the batch just became full.
    ///
    /// Returns whether a flush happened.
    pub async fn push(&mut self, row: Row) -> Result<bool> {
        if self.batch.push(row) {
            self.flush().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Load the pending rows, if any.
    ///
    /// The batch is cleared whether or not the load succeeded. A failure is
    /// logged and counted, then returned under [`FlushFailurePolicy::Abort`]
    /// and swallowed under [`FlushFailurePolicy::Continue`].
    pub async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let rows = self.batch.len() as u64;
        let start = Instant::now();
        let result = self.loader.load(self.batch.rows()).await;
        self.batch.clear();

        match result {
            Ok(loaded) => {
                self.stats.rows_loaded += loaded;
                self.stats.batches_flushed += 1;
                info!(
                    rows = loaded,
                    total_rows = self.stats.rows_loaded,
                    batches = self.stats.batches_flushed,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Flushed batch"
                );
                Ok(())
            }
            Err(e) => {
                self.stats.batches_failed += 1;
                self.stats.rows_failed += rows;
                error!(
                    rows,
                    failed_batches = self.stats.batches_failed,
                    policy = ?self.policy,
                    error = %e,
                    "Batch flush failed, rows discarded"
                );
                match self.policy {
                    FlushFailurePolicy::Abort => Err(IngestError::Flush(e)),
                    FlushFailurePolicy::Continue => Ok(()),
                }
            }
        }
    }

    /// Flush the final partial batch and return the counters.
    pub async fn finish(mut self) -> Result<BatchStats> {
        self.flush().await?;
        Ok(self.stats)
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }
}

//! Result aggregation.
//!
//! The aggregator is the single consumer of the result queue. It turns each
//! successful response body into rows, feeds them to the [`Batcher`] in
//! arrival order, and flushes synchronously when a batch fills, so no new
//! results are drained while a load is in flight.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::batch::{BatchStats, Batcher};
use crate::error::Result;
use crate::loader::BulkLoader;
use crate::row::parse_range_line;
use crate::worker::FetchResult;

/// Emit a progress line every this many units.
const PROGRESS_INTERVAL: u64 = 4096;

/// Counters for one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub units_received: u64,
    pub units_failed: u64,
    pub rows_parsed: u64,
    pub lines_skipped: u64,
}

/// Final accounting for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub units: AggregatorStats,
    pub batches: BatchStats,
}

impl RunSummary {
    /// No unit failed and no batch was discarded.
    pub fn is_clean(&self) -> bool {
        self.units.units_failed == 0 && self.batches.batches_failed == 0
    }
}

pub struct Aggregator<L: BulkLoader> {
    batcher: Batcher<L>,
    stats: AggregatorStats,
    started: Instant,
}

impl<L: BulkLoader> Aggregator<L> {
    pub fn new(batcher: Batcher<L>) -> Self {
        Self {
            batcher,
            stats: AggregatorStats::default(),
            started: Instant::now(),
        }
    }

    /// Absorb one fetch result.
    ///
    /// Fetch failures and malformed lines are logged and skipped. Only a
    /// flush failure under the abort policy is returned.
    pub async fn handle(&mut self, result: FetchResult) -> Result<()> {
        self.stats.units_received += 1;
        let unit = result.unit;

        let body = match result.outcome {
            Ok(body) => body,
            Err(e) => {
                self.stats.units_failed += 1;
                warn!(
                    %unit,
                    attempts = e.attempts,
                    kind = %e.last.kind,
                    error = %e,
                    "Fetch failed, skipping unit"
                );
                return Ok(());
            }
        };

        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_range_line(unit, line) {
                Ok(row) => {
                    self.stats.rows_parsed += 1;
                    self.batcher.push(row).await?;
                }
                Err(e) => {
                    self.stats.lines_skipped += 1;
                    warn!(%unit, line, error = %e, "Skipping malformed line");
                }
            }
        }

        if self.stats.units_received % PROGRESS_INTERVAL == 0 {
            self.log_progress();
        }
        Ok(())
    }

    /// Drain `results` until every producer is gone, then flush what is left.
    pub async fn run(mut self, mut results: mpsc::Receiver<FetchResult>) -> Result<RunSummary> {
        while let Some(result) = results.recv().await {
            self.handle(result).await?;
        }
        self.finish().await
    }

    /// Flush the partial batch and return the final counters.
    pub async fn finish(self) -> Result<RunSummary> {
        let units = self.stats;
        let elapsed = self.started.elapsed();
        let batches = self.batcher.finish().await?;

        info!(
            units = units.units_received,
            units_failed = units.units_failed,
            rows_parsed = units.rows_parsed,
            lines_skipped = units.lines_skipped,
            rows_loaded = batches.rows_loaded,
            batches = batches.batches_flushed,
            batches_failed = batches.batches_failed,
            elapsed_s = elapsed.as_secs(),
            "Aggregation complete"
        );
        Ok(RunSummary { units, batches })
    }

    fn log_progress(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.stats.units_received as f64 / elapsed
        } else {
            0.0
        };
        info!(
            units = self.stats.units_received,
            units_failed = self.stats.units_failed,
            rows = self.stats.rows_parsed,
            rows_loaded = self.batcher.stats().rows_loaded,
            pending = self.batcher.pending(),
            units_per_sec = rate as u64,
            "Progress"
        );
    }
}

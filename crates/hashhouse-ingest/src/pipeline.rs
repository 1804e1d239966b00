//! Range import pipeline.
//!
//! ```text
//!  Keyspace ──► work queue ──► N fetch workers ──► result queue ──► Aggregator ──► BulkLoader
//!  (1 task)    (bounded,       (ClientSlot +       (bounded,         (Batcher)      (1 tx per
//!               multi-consumer) RetryPolicy)        single consumer)                 batch)
//! ```
//!
//! Shutdown is driven by the queues closing. The enumerator closes the work
//! queue when it runs out of units; workers drain it and drop their result
//! senders; the aggregator sees the result queue close and does the final
//! flush. If the aggregator stops early, the closed result queue stops the
//! workers and their dropped receivers stop the enumerator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, RunSummary};
use crate::batch::Batcher;
use crate::client::{ClientFactory, HttpClientFactory};
use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::keyspace::{enumerate_into, Keyspace};
use crate::loader::{BulkLoader, PgBulkLoader};
use crate::store;
use crate::worker::FetchWorkerPool;

/// A configured fetch, parse and load pipeline.
pub struct RangePipeline<F: ClientFactory> {
    config: PipelineConfig,
    factory: Arc<F>,
}

impl<F: ClientFactory> RangePipeline<F> {
    pub fn new(config: PipelineConfig, factory: Arc<F>) -> Self {
        Self { config, factory }
    }

    fn keyspace(&self) -> Keyspace {
        match self.config.limit {
            Some(limit) => Keyspace::first(limit),
            None => Keyspace::new(),
        }
    }

    /// Run to completion, loading through `loader`.
    pub async fn run<L: BulkLoader>(&self, loader: L) -> Result<RunSummary> {
        self.config.validate()?;

        let keyspace = self.keyspace();
        info!(
            units = keyspace.len(),
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            flush_failure = ?self.config.flush_failure,
            "Starting range import"
        );

        let (work_tx, work_rx) = async_channel::bounded(self.config.work_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.config.result_queue_capacity);

        let enumerator = tokio::spawn(enumerate_into(keyspace, work_tx));
        let workers = FetchWorkerPool::spawn(
            self.config.workers,
            self.factory.clone(),
            self.config.retry.policy(),
            work_rx,
            result_tx,
        );

        let batcher = Batcher::new(loader, self.config.batch_size, self.config.flush_failure);
        let outcome = Aggregator::new(batcher).run(result_rx).await;
        // The result receiver is gone now, so workers and enumerator wind down
        // on their own even when the aggregator aborted.

        let enqueued = enumerator.await?;
        let fetched = workers.join().await?;
        if fetched != u64::from(enqueued) {
            warn!(enqueued, fetched, "Not every enqueued unit was fetched");
        }

        let summary = outcome?;
        info!(
            units = summary.units.units_received,
            units_failed = summary.units.units_failed,
            rows_loaded = summary.batches.rows_loaded,
            batches_failed = summary.batches.batches_failed,
            "Range import finished"
        );
        Ok(summary)
    }
}

/// Connect, optionally truncate, and import every range into PostgreSQL.
pub async fn run_range_import(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;

    let pool = store::connect(&config.database_url, 2).await?;
    if config.truncate {
        store::truncate(&pool, &config.table).await?;
    }

    let factory = HttpClientFactory::new(config.http.clone());
    // Surface client misconfiguration before any work is queued.
    factory
        .build()
        .map_err(|e| IngestError::Setup(format!("cannot build HTTP client: {}", e)))?;

    let loader = PgBulkLoader::new(pool.clone(), config.table.clone());
    let summary = RangePipeline::new(config.clone(), Arc::new(factory))
        .run(loader)
        .await;
    pool.close().await;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{FlakyLoader, RecordingLoader};
    use crate::config::FlushFailurePolicy;
    use crate::error::FetchErrorKind;
    use crate::retry::tests::ScriptedFactory;

    fn config(limit: u32, batch_size: usize) -> PipelineConfig {
        let mut config = PipelineConfig {
            limit: Some(limit),
            batch_size,
            workers: 4,
            work_queue_capacity: 8,
            result_queue_capacity: 8,
            ..PipelineConfig::default()
        };
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        config
    }

    fn body_script(units: usize) -> Vec<std::result::Result<String, FetchErrorKind>> {
        (0..units)
            .map(|_| {
                Ok("1E4C9B93F3F0682250B6CF8331B7EE68FD8:1\r\n0018A45C4D1DEF81644B54AB7F969B88D65:2"
                    .to_string())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_every_unit_fetched_and_loaded() {
        let factory = Arc::new(ScriptedFactory::new(body_script(50)));
        let loader = RecordingLoader::default();

        let summary = RangePipeline::new(config(50, 16), factory)
            .run(loader.clone())
            .await
            .unwrap();

        assert_eq!(summary.units.units_received, 50);
        assert_eq!(summary.batches.rows_loaded, 100);
        let sizes = loader.sizes();
        assert!(sizes[..sizes.len() - 1].iter().all(|&s| s == 16));
        assert_eq!(sizes.iter().sum::<usize>(), 100);

        // Every row carries the prefix of the unit it came from.
        for row in loader.batches.lock().unwrap().iter().flatten() {
            assert_eq!(&row.hash[..5], row.prefix);
            assert_eq!(&row.hash[..2], row.partition_prefix);
        }
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_through_pipeline() {
        let mut script = vec![
            Err(FetchErrorKind::RateLimited),
            Err(FetchErrorKind::ConnectionReset),
        ];
        script.extend(body_script(10));
        let factory = Arc::new(ScriptedFactory::new(script));

        let summary = RangePipeline::new(config(10, 100), factory)
            .run(RecordingLoader::default())
            .await
            .unwrap();

        assert_eq!(summary.units.units_failed, 0);
        assert_eq!(summary.units.units_received, 10);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_unit() {
        let mut script = vec![Err(FetchErrorKind::Status(404))];
        script.extend(body_script(4));
        let factory = Arc::new(ScriptedFactory::new(script));

        let summary = RangePipeline::new(config(5, 100), factory)
            .run(RecordingLoader::default())
            .await
            .unwrap();

        assert_eq!(summary.units.units_received, 5);
        assert_eq!(summary.units.units_failed, 1);
        assert_eq!(summary.batches.rows_loaded, 8);
        assert!(!summary.is_clean());
    }

    #[tokio::test]
    async fn test_abort_on_flush_failure_stops_pipeline() {
        let factory = Arc::new(ScriptedFactory::new(body_script(1000)));
        let loader = FlakyLoader {
            fail_on: vec![0],
            ..Default::default()
        };

        let err = RangePipeline::new(config(1000, 4), factory)
            .run(loader)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Flush(_)));
    }

    #[tokio::test]
    async fn test_continue_on_flush_failure_finishes() {
        let factory = Arc::new(ScriptedFactory::new(body_script(10)));
        let loader = FlakyLoader {
            fail_on: vec![0],
            ..Default::default()
        };
        let mut config = config(10, 4);
        config.flush_failure = FlushFailurePolicy::Continue;

        let summary = RangePipeline::new(config, factory).run(loader).await.unwrap();

        assert_eq!(summary.batches.batches_failed, 1);
        assert_eq!(summary.batches.rows_loaded, 16);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_start() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut config = config(10, 4);
        config.workers = 0;

        let err = RangePipeline::new(config, factory.clone())
            .run(RecordingLoader::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Config(_)));
        assert_eq!(factory.builds.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}

//! Hashhouse Ingest
//!
//! Bulk-loads password-hash range data into a list-partitioned PostgreSQL
//! table, either by walking the whole 5-character hex keyspace of a range
//! service or by reading a local dump file.
//!
//! ## Architecture
//!
//! - **Keyspace**: `Keyspace` enumerates every `00000`..`FFFFF` prefix into a bounded work queue.
//! - **Fetch**: `FetchWorkerPool` runs N workers, each with its own `ClientSlot` and `RetryPolicy`.
//! - **Aggregate**: `Aggregator` parses response lines into `Row`s and feeds the `Batcher`.
//! - **Load**: `PgBulkLoader` writes each batch with one `COPY` inside one transaction.
//! - **Store**: `store` provisions and truncates the partitioned table.
//!
//! The HTTP client and the loader sit behind the `ClientFactory` and
//! `BulkLoader` traits so the pipeline can run against in-memory fakes.

pub mod aggregator;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod file_import;
pub mod keyspace;
pub mod loader;
pub mod pipeline;
pub mod retry;
pub mod row;
pub mod store;
pub mod worker;

// Re-export key types at crate root for convenience.
pub use aggregator::{Aggregator, AggregatorStats, RunSummary};
pub use batch::{Batch, BatchStats, Batcher};
pub use client::{ClientFactory, HttpClientFactory, HttpRangeClient, RangeClient};
pub use config::{FlushFailurePolicy, HttpClientConfig, PipelineConfig, RetryConfig};
pub use error::{FetchError, FetchErrorKind, IngestError, LoadError, ParseError, Result, RetryError};
pub use file_import::{run_file_import, FileImportSummary, FileImporter};
pub use keyspace::{Keyspace, KeyspaceUnit};
pub use loader::{BulkLoader, PgBulkLoader};
pub use pipeline::{run_range_import, RangePipeline};
pub use retry::{ClientSlot, RetryPolicy};
pub use row::Row;
pub use worker::{FetchResult, FetchWorkerPool};

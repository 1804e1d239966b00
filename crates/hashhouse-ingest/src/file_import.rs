//! Import from a local dump file.
//!
//! Each line holds one `full_hash:count` record. Rows go through the same
//! [`Batcher`] and loader as the range pipeline.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::batch::{BatchStats, Batcher};
use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::loader::{BulkLoader, PgBulkLoader};
use crate::row::parse_record_line;
use crate::store;

/// Counters for one file import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileImportSummary {
    pub lines_read: u64,
    pub lines_skipped: u64,
    pub batches: BatchStats,
}

impl FileImportSummary {
    pub fn is_clean(&self) -> bool {
        self.batches.batches_failed == 0
    }
}

/// Reads records line by line and feeds them to a [`Batcher`].
pub struct FileImporter<L: BulkLoader> {
    batcher: Batcher<L>,
    first: Option<u64>,
}

impl<L: BulkLoader> FileImporter<L> {
    pub fn new(batcher: Batcher<L>) -> Self {
        Self {
            batcher,
            first: None,
        }
    }

    /// Stop after the first `n` lines.
    pub fn with_first(mut self, n: u64) -> Self {
        self.first = Some(n);
        self
    }

    /// Import every record from `reader`, then flush the remainder.
    ///
    /// Lines that are not valid UTF-8 are skipped like any other malformed
    /// record.
    pub async fn run<R: AsyncBufRead + Unpin>(mut self, mut reader: R) -> Result<FileImportSummary> {
        let mut buf = Vec::new();
        let mut lines_read = 0u64;
        let mut lines_skipped = 0u64;

        loop {
            if self.first.is_some_and(|first| lines_read >= first) {
                break;
            }
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            lines_read += 1;

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    lines_skipped += 1;
                    warn!(line_number = lines_read, error = %e, "Skipping record that is not valid UTF-8");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match parse_record_line(line) {
                Ok(row) => {
                    if self.batcher.push(row).await? {
                        info!(
                            lines_read,
                            rows_loaded = self.batcher.stats().rows_loaded,
                            "Import progress"
                        );
                    }
                }
                Err(e) => {
                    lines_skipped += 1;
                    warn!(line_number = lines_read, line, error = %e, "Skipping malformed record");
                }
            }
        }

        let batches = self.batcher.finish().await?;
        info!(
            lines_read,
            lines_skipped,
            rows_loaded = batches.rows_loaded,
            batches = batches.batches_flushed,
            batches_failed = batches.batches_failed,
            "File import finished"
        );
        Ok(FileImportSummary {
            lines_read,
            lines_skipped,
            batches,
        })
    }
}

/// Connect, optionally truncate, and import `path` into PostgreSQL.
pub async fn run_file_import(
    config: &PipelineConfig,
    path: impl AsRef<Path>,
    first: Option<u64>,
) -> Result<FileImportSummary> {
    config.validate()?;
    let path = path.as_ref();

    let file = File::open(path)
        .await
        .map_err(|e| IngestError::Setup(format!("cannot open {}: {}", path.display(), e)))?;

    let pool = store::connect(&config.database_url, 2).await?;
    if config.truncate {
        store::truncate(&pool, &config.table).await?;
    }

    info!(path = %path.display(), table = %config.table, first = ?first, "Starting file import");

    let loader = PgBulkLoader::new(pool.clone(), config.table.clone());
    let mut importer = FileImporter::new(Batcher::new(loader, config.batch_size, config.flush_failure));
    if let Some(n) = first {
        importer = importer.with_first(n);
    }

    let summary = importer.run(BufReader::new(file)).await;
    pool.close().await;
    summary
}

//! Import commands.
//!
//! Both commands build one `PipelineConfig` (defaults, then the optional
//! config file, then flags) and hand it to the library. A run that skipped
//! units or discarded batches still exits non-zero.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use hashhouse_ingest::{run_file_import, run_range_import, FlushFailurePolicy, PipelineConfig};

#[derive(Args)]
pub struct DataImportArgs {
    /// Database connection string
    #[arg(long, env = "DATABASE_URL")]
    pub dsn: String,

    /// Password file path (one `hash:count` record per line)
    #[arg(long)]
    pub password_file: PathBuf,

    /// If greater than 0, limits the import to the first N lines
    #[arg(long, default_value = "0")]
    pub first: u64,

    /// Do not truncate the table before import
    #[arg(long)]
    pub no_truncate: bool,

    /// Number of records to insert in one batch
    #[arg(long, default_value = "1000000")]
    pub batch_size: usize,

    /// Destination table name
    #[arg(long, default_value = "hibp")]
    pub table: String,

    /// What to do when a batch fails to load: abort or continue
    #[arg(long, default_value = "abort")]
    pub flush_failure: FlushFailurePolicy,
}

#[derive(Args)]
pub struct RangeImportArgs {
    /// TOML config file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Database connection string
    #[arg(long, env = "DATABASE_URL")]
    pub dsn: Option<String>,

    /// Do not truncate the table before import
    #[arg(long)]
    pub no_truncate: bool,

    /// Number of records to insert in one batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Number of parallel fetch workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Range API base URL; the 5-character prefix is appended
    #[arg(long)]
    pub base_url: Option<String>,

    /// Only fetch the first N ranges
    #[arg(long)]
    pub limit: Option<u32>,

    /// Retries per range for transient failures
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Destination table name
    #[arg(long)]
    pub table: Option<String>,

    /// What to do when a batch fails to load: abort or continue
    #[arg(long)]
    pub flush_failure: Option<FlushFailurePolicy>,
}

pub async fn handle_data_import(args: DataImportArgs) -> Result<()> {
    let config = PipelineConfig {
        database_url: args.dsn,
        table: args.table,
        truncate: !args.no_truncate,
        batch_size: args.batch_size,
        flush_failure: args.flush_failure,
        ..PipelineConfig::default()
    };
    let first = (args.first > 0).then_some(args.first);

    let summary = run_file_import(&config, &args.password_file, first)
        .await
        .with_context(|| format!("Import of {} failed", args.password_file.display()))?;

    info!(
        lines = summary.lines_read,
        skipped = summary.lines_skipped,
        rows = summary.batches.rows_loaded,
        "Data import complete"
    );
    if !summary.is_clean() {
        bail!(
            "{} batch(es) with {} rows failed to load",
            summary.batches.batches_failed,
            summary.batches.rows_failed
        );
    }
    Ok(())
}

pub async fn handle_range_import(args: RangeImportArgs) -> Result<()> {
    let config = build_range_config(args)?;

    let summary = run_range_import(&config)
        .await
        .context("Range import failed")?;

    info!(
        units = summary.units.units_received,
        rows = summary.batches.rows_loaded,
        "Range import complete"
    );
    if !summary.is_clean() {
        bail!(
            "{} range(s) could not be fetched and {} batch(es) failed to load",
            summary.units.units_failed,
            summary.batches.batches_failed
        );
    }
    Ok(())
}

fn build_range_config(args: RangeImportArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dsn) = args.dsn {
        config.database_url = dsn;
    }
    if args.no_truncate {
        config.truncate = false;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(base_url) = args.base_url {
        config.http.base_url = base_url;
    }
    if let Some(limit) = args.limit {
        config.limit = Some(limit);
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(table) = args.table {
        config.table = table;
    }
    if let Some(policy) = args.flush_failure {
        config.flush_failure = policy;
    }

    if config.database_url.is_empty() {
        bail!("no database configured: pass --dsn, set DATABASE_URL, or set database_url in the config file");
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RangeImportArgs {
        RangeImportArgs {
            config: None,
            dsn: Some("postgres://localhost/hibp".to_string()),
            no_truncate: false,
            batch_size: None,
            workers: None,
            base_url: None,
            limit: None,
            max_retries: None,
            table: None,
            flush_failure: None,
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = build_range_config(RangeImportArgs {
            no_truncate: true,
            workers: Some(8),
            limit: Some(16),
            flush_failure: Some(FlushFailurePolicy::Continue),
            ..args()
        })
        .unwrap();

        assert!(!config.truncate);
        assert_eq!(config.workers, 8);
        assert_eq!(config.limit, Some(16));
        assert_eq!(config.flush_failure, FlushFailurePolicy::Continue);
        assert_eq!(config.batch_size, 1_000_000);
    }

    #[test]
    fn test_missing_dsn_rejected() {
        let result = build_range_config(RangeImportArgs { dsn: None, ..args() });
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = build_range_config(RangeImportArgs {
            batch_size: Some(0),
            ..args()
        });
        assert!(result.is_err());
    }
}

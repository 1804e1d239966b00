//! Schema provisioning command.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use hashhouse_ingest::{config::validate_table_name, store};

#[derive(Args)]
pub struct MigrateArgs {
    /// Database connection string
    #[arg(long, env = "DATABASE_URL")]
    pub dsn: Option<String>,

    /// Destination table name
    #[arg(long, default_value = "hibp")]
    pub table: String,

    /// Print the DDL instead of executing it
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn handle(args: MigrateArgs) -> Result<()> {
    validate_table_name(&args.table)?;

    if args.dry_run {
        for statement in store::generate_partition_schema(&args.table) {
            println!("{};", statement);
        }
        return Ok(());
    }

    let dsn = args
        .dsn
        .as_deref()
        .context("--dsn or DATABASE_URL is required")?;
    let pool = store::connect(dsn, 1)
        .await
        .context("Failed to connect to database")?;

    store::apply_schema(&pool, &args.table)
        .await
        .with_context(|| format!("Failed to create table '{}'", args.table))?;
    pool.close().await;

    info!(table = %args.table, "Migration complete");
    Ok(())
}

//! Destination table management.
//!
//! The table is list-partitioned on the 2-character `partition_prefix`, one
//! partition per byte value, each with its own index on `prefix` so prefix
//! lookups touch a single partition.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use crate::config::validate_table_name;
use crate::error::{IngestError, Result};

/// Number of list partitions (one per leading byte).
pub const PARTITION_COUNT: usize = 256;

/// Open a connection pool to the destination database.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(url)
        .map_err(|e| IngestError::Setup(format!("invalid database url: {}", e)))?;
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|e| IngestError::Setup(format!("cannot connect to database: {}", e)))
}

/// Empty the destination table and reset its row id sequence.
pub async fn truncate(pool: &PgPool, table: &str) -> Result<()> {
    validate_table_name(table)?;
    sqlx::query(&format!("TRUNCATE TABLE {} RESTART IDENTITY", table))
        .execute(pool)
        .await
        .map_err(|e| IngestError::Setup(format!("cannot truncate '{}': {}", table, e)))?;
    info!(table, "Truncated destination table");
    Ok(())
}

/// DDL for the partitioned table, in execution order: the base table, then
/// each partition followed by its prefix index.
pub fn generate_partition_schema(table: &str) -> Vec<String> {
    let mut statements = Vec::with_capacity(1 + 2 * PARTITION_COUNT);
    statements.push(format!(
        "CREATE TABLE {table} (\n    \
             row_id serial,\n    \
             partition_prefix varchar(2) NOT NULL,\n    \
             prefix varchar(5) NOT NULL,\n    \
             hash varchar(40) NOT NULL,\n    \
             count integer NOT NULL,\n    \
             PRIMARY KEY (row_id, partition_prefix, prefix)\n\
         ) PARTITION BY LIST (partition_prefix)"
    ));

    for byte in 0..PARTITION_COUNT {
        let key = format!("{:02X}", byte);
        statements.push(format!(
            "CREATE TABLE {table}_prefix_{key} PARTITION OF {table} FOR VALUES IN ('{key}')"
        ));
        statements.push(format!(
            "CREATE INDEX {table}_prefix_idx_{key} ON {table}_prefix_{key} (prefix)"
        ));
    }
    statements
}

/// Create the partitioned table in one transaction.
///
/// Fails, leaving nothing behind, if any of the objects already exist.
pub async fn apply_schema(pool: &PgPool, table: &str) -> Result<()> {
    validate_table_name(table)?;
    let statements = generate_partition_schema(table);

    let mut tx = pool.begin().await?;
    for statement in &statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(
        table,
        partitions = PARTITION_COUNT,
        statements = statements.len(),
        "Created partitioned table"
    );
    Ok(())
}

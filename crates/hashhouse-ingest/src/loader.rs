//! Bulk loading into PostgreSQL.
//!
//! A batch is encoded once into a `COPY ... FROM STDIN` text-format buffer and
//! streamed to the server inside a single transaction. Either every row of
//! the batch is committed or none is.

use std::time::Instant;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use sqlx::postgres::{PgConnection, PgPool};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::row::Row;

/// Destination columns, in buffer order.
pub const COPY_COLUMNS: [&str; 4] = ["partition_prefix", "prefix", "hash", "count"];

/// Loads whole batches, one transaction per call.
#[async_trait]
pub trait BulkLoader: Send {
    /// Load `rows` atomically and return the number of rows written.
    async fn load(&mut self, rows: &[Row]) -> Result<u64, LoadError>;
}

/// `COPY` statement for `table`. The name must already be validated.
pub fn copy_statement(table: &str) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        table,
        COPY_COLUMNS.join(", ")
    )
}

/// Append `rows` to `buf` in COPY text format.
pub fn encode_rows(rows: &[Row], buf: &mut BytesMut) {
    for row in rows {
        put_field(buf, &row.partition_prefix);
        buf.put_u8(b'\t');
        put_field(buf, &row.prefix);
        buf.put_u8(b'\t');
        put_field(buf, &row.hash);
        buf.put_u8(b'\t');
        buf.put_slice(row.count.to_string().as_bytes());
        buf.put_u8(b'\n');
    }
}

fn put_field(buf: &mut BytesMut, value: &str) {
    for &b in value.as_bytes() {
        match b {
            b'\\' => buf.put_slice(b"\\\\"),
            b'\t' => buf.put_slice(b"\\t"),
            b'\n' => buf.put_slice(b"\\n"),
            b'\r' => buf.put_slice(b"\\r"),
            _ => buf.put_u8(b),
        }
    }
}

/// [`BulkLoader`] backed by a PostgreSQL pool.
///
/// The encode buffer is kept between batches and cleared after each load.
pub struct PgBulkLoader {
    pool: PgPool,
    table: String,
    statement: String,
    buffer: BytesMut,
}

impl PgBulkLoader {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            pool,
            statement: copy_statement(&table),
            table,
            buffer: BytesMut::new(),
        }
    }
}

#[async_trait]
impl BulkLoader for PgBulkLoader {
    async fn load(&mut self, rows: &[Row]) -> Result<u64, LoadError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        self.buffer.clear();
        encode_rows(rows, &mut self.buffer);

        let mut tx = self.pool.begin().await.map_err(LoadError::Begin)?;

        let copied = match copy_buffer(&mut *tx, &self.statement, &self.buffer).await {
            Ok(copied) => copied,
            Err(source) => {
                if let Err(e) = tx.rollback().await {
                    warn!(table = %self.table, error = %e, "Rollback after failed copy also failed");
                }
                self.buffer.clear();
                return Err(LoadError::Copy {
                    table: self.table.clone(),
                    source,
                });
            }
        };

        tx.commit().await.map_err(LoadError::Commit)?;
        self.buffer.clear();

        debug!(
            table = %self.table,
            rows = copied,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch committed"
        );
        Ok(copied)
    }
}

async fn copy_buffer(conn: &mut PgConnection, statement: &str, data: &[u8]) -> Result<u64, sqlx::Error> {
    let mut copy = conn.copy_in_raw(statement).await?;
    let sent = copy.send(data).await.map(|_| ());
    if let Err(e) = sent {
        if let Err(abort_err) = copy.abort(e.to_string()).await {
            debug!(error = %abort_err, "COPY abort failed");
        }
        return Err(e);
    }
    copy.finish().await
}

//! Postgres bulk-copy store backed by a sqlx pool
//!
//! Rows are shipped with `COPY ... FROM STDIN WITH (FORMAT csv)`. Each chunk is
//! encoded into CSV frames of [`FRAME_ROWS`] rows and sent over one copy stream
//! inside the chunk's transaction. Identifiers come from file headers, so they
//! are always quoted.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{BulkCopyStore, CopyTransaction, TableStore};
use crate::error::{LoadError, LoadStage};
use crate::source::Record;

/// Rows per CSV frame sent over the copy stream
pub const FRAME_ROWS: usize = 4096;

/// Pooled Postgres connection source
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized to the number of concurrent chunk transactions
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Round-trip a trivial query to prove the database is reachable
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BulkCopyStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn CopyTransaction>, LoadError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LoadError::store(LoadStage::Begin, e))?;
        Ok(Box::new(PgCopyTransaction { tx }))
    }
}

#[async_trait]
impl TableStore for PgStore {
    async fn recreate_table(&self, table: &str, columns: &[String]) -> Result<(), LoadError> {
        let stage = |e: sqlx::Error| LoadError::store(LoadStage::CreateTable, e);

        let mut tx = self.pool.begin().await.map_err(stage)?;
        sqlx::query(&drop_table_sql(table))
            .execute(&mut *tx)
            .await
            .map_err(stage)?;
        sqlx::query(&create_table_sql(table, columns))
            .execute(&mut *tx)
            .await
            .map_err(stage)?;
        tx.commit().await.map_err(stage)?;

        info!(table, columns = columns.len(), "Recreated table");
        Ok(())
    }
}

struct PgCopyTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CopyTransaction for PgCopyTransaction {
    async fn copy_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Record],
    ) -> Result<u64, LoadError> {
        let statement = copy_statement(table, columns);
        let mut copy = self
            .tx
            .copy_in_raw(&statement)
            .await
            .map_err(|e| LoadError::store(LoadStage::OpenCopy, e))?;

        for frame in rows.chunks(FRAME_ROWS) {
            let bytes = encode_frame(frame)?;
            copy.send(bytes)
                .await
                .map_err(|e| LoadError::store(LoadStage::SubmitRow, e))?;
        }

        let written = copy
            .finish()
            .await
            .map_err(|e| LoadError::store(LoadStage::FinishCopy, e))?;
        let written = check_row_count(rows.len(), written)?;

        debug!(table, rows = written, "COPY finished");
        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<(), LoadError> {
        self.tx
            .commit()
            .await
            .map_err(|e| LoadError::store(LoadStage::Commit, e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LoadError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| LoadError::store(LoadStage::Rollback, e))
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

/// `CREATE TABLE` with every column typed as text
pub fn create_table_sql(table: &str, columns: &[String]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} text", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), defs)
}

/// COPY statement; `FORCE_NOT_NULL` keeps empty fields as empty strings
pub fn copy_statement(table: &str, columns: &[String]) -> String {
    let list = column_list(columns);
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, FORCE_NOT_NULL ({}))",
        quote_ident(table),
        list,
        list
    )
}

/// Servers before 18 read an unquoted `\.` line as end-of-data
const END_OF_DATA: &str = "\\.";

/// The server must acknowledge every row that was sent
fn check_row_count(sent: usize, written: u64) -> Result<u64, LoadError> {
    if written != sent as u64 {
        return Err(LoadError::store(
            LoadStage::FinishCopy,
            format!("COPY stored {} of {} rows", written, sent),
        ));
    }
    Ok(written)
}

/// Encode rows as newline-terminated CSV
///
/// A frame holding a bare `\.` field is written fully quoted so the server
/// never mistakes it for the end-of-data marker.
pub fn encode_frame(rows: &[Record]) -> Result<Vec<u8>, LoadError> {
    let stage = |e: csv::Error| LoadError::store(LoadStage::SubmitRow, e);

    let quote_style = if rows.iter().any(|row| row.iter().any(|f| f == END_OF_DATA)) {
        csv::QuoteStyle::Always
    } else {
        csv::QuoteStyle::Necessary
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(quote_style)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(rows.len() * 64));

    for row in rows {
        writer.write_record(row.iter()).map_err(stage)?;
    }

    writer
        .into_inner()
        .map_err(|e| LoadError::store(LoadStage::SubmitRow, e.error().to_string()))
}

//! PostgreSQL store
//!
//! Rows go in through multi-row `INSERT ... ON CONFLICT` statements built
//! with [`QueryBuilder`], in chunks to stay under the bind parameter limit.
//! The `fileposition` upsert runs in the same transaction as the rows.

use arcterx_common::{path_key, FileCursor};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{query_builder::Separated, PgPool, Postgres, QueryBuilder};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{dedupe_batch, CommitStats, IngestStore, OffsetStore};
use crate::config::DatabaseConfig;
use crate::decode::{ConflictPolicy, Record};
use crate::error::IngestResult;

/// Rows per INSERT statement
const CHUNK_SIZE: usize = 500;

/// A record with a target table
pub trait PgRecord: Record {
    const TABLE: &'static str;

    /// Column order used by [`PgRecord::push_binds`]
    const COLUMNS: &'static [&'static str];

    /// Columns of the table's natural-key constraint
    const KEY_COLUMNS: &'static [&'static str];

    /// Bind one value per entry of [`PgRecord::COLUMNS`]
    fn push_binds<'args>(&self, b: &mut Separated<'_, 'args, Postgres, &'static str>);
}

/// `ON CONFLICT` clause for a record's policy
pub fn conflict_clause<R: PgRecord>() -> String {
    let keys = R::KEY_COLUMNS.join(", ");
    match R::CONFLICT {
        ConflictPolicy::KeepFirst => format!(" ON CONFLICT ({}) DO NOTHING", keys),
        ConflictPolicy::ReplaceWithLatest => {
            let updates: Vec<String> = R::COLUMNS
                .iter()
                .filter(|c| !R::KEY_COLUMNS.contains(*c))
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            if updates.is_empty() {
                format!(" ON CONFLICT ({}) DO NOTHING", keys)
            } else {
                format!(" ON CONFLICT ({}) DO UPDATE SET {}", keys, updates.join(", "))
            }
        }
    }
}

const UPSERT_POSITION: &str = "INSERT INTO fileposition (filename, position) VALUES ($1, $2) \
     ON CONFLICT (filename) DO UPDATE SET position = EXCLUDED.position";

/// Offset and row store over a shared connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with the configured limits
    pub async fn connect(config: &DatabaseConfig) -> IngestResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Database connection pool established");
        Ok(Self::new(pool))
    }

    /// Create or upgrade the offset table and all target tables
    pub async fn migrate(&self) -> IngestResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OffsetStore for PgStore {
    async fn load(&self, path: &Path) -> IngestResult<Option<u64>> {
        let key = path_key(path);
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM fileposition WHERE filename = $1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;

        match position {
            Some(position) => Ok(Some(FileCursor::from_row(&key, position)?.offset)),
            None => Ok(None),
        }
    }

    async fn advance(&self, cursor: &FileCursor) -> IngestResult<()> {
        sqlx::query(UPSERT_POSITION)
            .bind(cursor.key())
            .bind(cursor.position()?)
            .execute(&self.pool)
            .await?;
        debug!(cursor = %cursor, "Advanced cursor");
        Ok(())
    }

    async fn reset(&self, path: &Path) -> IngestResult<bool> {
        let result = sqlx::query("UPDATE fileposition SET position = 0 WHERE filename = $1")
            .bind(path_key(path))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl<R: PgRecord> IngestStore<R> for PgStore {
    async fn commit(&self, cursor: &FileCursor, rows: &[R]) -> IngestResult<CommitStats> {
        let position = cursor.position()?;
        let rows = dedupe_batch(rows);
        let conflict = conflict_clause::<R>();
        let insert = format!("INSERT INTO {} ({}) ", R::TABLE, R::COLUMNS.join(", "));

        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let mut written = 0u64;
        for chunk in rows.chunks(CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(insert.as_str());
            query_builder.push_values(chunk.iter(), |mut b, row| row.push_binds(&mut b));
            query_builder.push(conflict.as_str());

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        sqlx::query(UPSERT_POSITION)
            .bind(cursor.key())
            .bind(position)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            table = R::TABLE,
            cursor = %cursor,
            submitted = rows.len(),
            written,
            "Committed batch"
        );

        Ok(CommitStats {
            submitted: rows.len(),
            written,
        })
    }
}

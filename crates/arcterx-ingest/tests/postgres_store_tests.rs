//! PostgreSQL store tests
//!
//! Run against a throwaway PostgreSQL container:
//!
//! ```text
//! cargo test -p arcterx-ingest --test postgres_store_tests -- --ignored
//! ```

use anyhow::Result;
use arcterx_common::FileCursor;
use arcterx_ingest::decode::{Decoded, DrifterDecoder, DrifterRow, LineDecoder, ScsDecoder};
use arcterx_ingest::{
    CommitStats, IngestCoordinator, IngestResult, IngestStore, OffsetStore, PgStore,
};
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,arcterx_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Start PostgreSQL and return a migrated store; keep the container alive
async fn setup() -> Result<(ContainerAsync<Postgres>, PgStore)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&conn_string)
        .await?;

    let store = PgStore::new(pool);
    store.migrate().await?;
    Ok((container, store))
}

fn drifter(line: &str) -> DrifterRow {
    match DrifterDecoder.decode(&(), line) {
        Decoded::Row(row) => row,
        other => panic!("expected a row, got {:?}", other),
    }
}

async fn commit(
    store: &PgStore,
    cursor: &FileCursor,
    rows: &[DrifterRow],
) -> IngestResult<CommitStats> {
    IngestStore::<DrifterRow>::commit(store, cursor, rows).await
}

async fn count(store: &PgStore, table: &str) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await?;
    Ok(n)
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_commit_is_atomic_and_idempotent() -> Result<()> {
    init_tracing();
    info!("Testing drifter commit and replay");
    let (_container, store) = setup().await?;

    let cursor = FileCursor::new("/data/drifter.1.csv", 96)?;
    let rows = vec![
        drifter("1,2021-01-01T00:00:00,10,20,1,2,3,4"),
        drifter("2,2021-01-01T00:00:00,11,21,1,2,3,4"),
        drifter("1,2021-01-01T00:00:00,99,99,1,2,3,4"),
    ];

    let stats = commit(&store, &cursor, &rows).await?;
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.written, 2);
    assert_eq!(store.load(&cursor.path).await?, Some(96));

    // Replaying the same batch is a no-op for rows
    let replay = commit(&store, &cursor, &rows).await?;
    assert_eq!(replay.written, 0);
    assert_eq!(count(&store, "drifter").await?, 2);

    let lat: Option<f64> = sqlx::query_scalar("SELECT lat FROM drifter WHERE id = '1'")
        .fetch_one(store.pool())
        .await?;
    assert_eq!(lat, Some(10.0));
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_failed_insert_rolls_back_cursor() -> Result<()> {
    init_tracing();
    let (_container, store) = setup().await?;

    let cursor = FileCursor::new("/data/drifter.1.csv", 48)?;
    commit(
        &store,
        &cursor,
        &[drifter("1,2021-01-01T00:00:00,10,20,1,2,3,4")],
    )
    .await?;

    // Break the target table so the next insert fails mid-transaction
    sqlx::query("ALTER TABLE drifter ADD CONSTRAINT lat_small CHECK (lat < 50)")
        .execute(store.pool())
        .await?;

    let next = FileCursor::new("/data/drifter.1.csv", 144)?;
    let result = commit(
        &store,
        &next,
        &[
            drifter("2,2021-01-01T00:00:00,10,20,1,2,3,4"),
            drifter("3,2021-01-01T00:00:00,80,20,1,2,3,4"),
        ],
    )
    .await;

    assert!(result.is_err());
    assert!(!result.unwrap_err().is_fatal());
    assert_eq!(store.load(&next.path).await?, Some(48));
    assert_eq!(count(&store, "drifter").await?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_scs_latest_reading_replaces_earlier() -> Result<()> {
    init_tracing();
    let (_container, store) = setup().await?;
    let dir = TempDir::new()?;
    let path = dir.path().join("TSG-RAW_20230501-000000.Raw");
    std::fs::write(&path, "05/01/2023,00:00:01.100,28.9,5.7,34.80\n")?;

    let coordinator: IngestCoordinator<ScsDecoder, PgStore> =
        IngestCoordinator::new(ScsDecoder, Arc::new(store.clone()));
    coordinator.ingest(&path).await?;

    let mut content = std::fs::read_to_string(&path)?;
    content.push_str("05/01/2023,00:00:00.900,29.0,5.8,34.95\n");
    std::fs::write(&path, content)?;
    coordinator.ingest(&path).await?;

    assert_eq!(count(&store, "scs").await?, 1);
    let salinity: Option<f64> =
        sqlx::query_scalar("SELECT (data->>'salinity')::float8 FROM scs")
            .fetch_one(store.pool())
            .await?;
    assert_eq!(salinity, Some(34.95));
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_reset_and_reprocess() -> Result<()> {
    init_tracing();
    let (_container, store) = setup().await?;
    let dir = TempDir::new()?;
    let path = dir.path().join("drifter.1.csv");
    std::fs::write(
        &path,
        "1,2021-01-01T00:00:00,10,20,1,2,3,4\n2,2021-01-01T00:00:00,10,20,1,2,3,4\n",
    )?;

    let coordinator: IngestCoordinator<DrifterDecoder, PgStore> =
        IngestCoordinator::new(DrifterDecoder, Arc::new(store.clone()));
    let first = coordinator.ingest(&path).await?;
    assert_eq!(first.written, 2);

    assert!(!store.reset(Path::new("/data/never-seen.csv")).await?);
    let replay = coordinator.reprocess(&path).await?;
    assert_eq!(replay.prior_offset, 0);
    assert_eq!(replay.written, 0);
    assert_eq!(count(&store, "drifter").await?, 2);
    Ok(())
}

//! Ingestion pass tests against the in-memory store
//!
//! Covers:
//! 1. Resuming from the stored offset as a file grows
//! 2. Replaying a pass whose commit failed
//! 3. Partial trailing lines and truncated rows
//! 4. Duplicate natural keys under both conflict policies

use anyhow::Result;
use arcterx_common::resolve_path;
use arcterx_ingest::decode::{DrifterDecoder, DrifterRow, ScsDecoder, ScsRow, SfmcDecoder, SfmcRow};
use arcterx_ingest::{IngestCoordinator, IngestError, MemoryStore, OffsetStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const SCENARIO_LINE_1: &str = "1,2021-01-01T00:00:00,10.0,20.0,1.0,2.0,3.0,4\n";

type DrifterCoordinator = IngestCoordinator<DrifterDecoder, MemoryStore<DrifterRow>>;

fn drifter_coordinator() -> DrifterCoordinator {
    IngestCoordinator::new(DrifterDecoder, Arc::new(MemoryStore::new()))
}

fn create(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn append(path: &Path, content: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

fn drifter_line(id: u32, minute: u32) -> String {
    format!("{id},2024-05-01T12:{minute:02}:00,17.2,134.1,29.4,1009.2,7.9,188\n")
}

fn ids(rows: &[DrifterRow]) -> Vec<String> {
    let mut ids: Vec<String> = rows.iter().map(|r| format!("{}@{}", r.id, r.t)).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_truncated_tail_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(
        &dir,
        "drifter.202418.csv",
        &format!("{SCENARIO_LINE_1}2,2021-01-0"),
    );
    let coordinator = drifter_coordinator();

    let first = coordinator.ingest(&path).await?;
    assert_eq!(first.rows, 1);
    assert_eq!(first.new_offset, SCENARIO_LINE_1.len() as u64);
    assert_eq!(coordinator.store().rows()[0].id, "1");

    append(&path, "1T00:00:00,11.0,21.0,1.0,2.0,3.0,4\n");
    let second = coordinator.ingest(&path).await?;
    assert_eq!(second.prior_offset, SCENARIO_LINE_1.len() as u64);
    assert_eq!(second.rows, 1);
    assert_eq!(second.new_offset, std::fs::metadata(&path)?.len());

    let rows = coordinator.store().rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.id == "2" && r.lat == Some(11.0)));
    Ok(())
}

#[tokio::test]
async fn test_incremental_ingest_matches_single_pass() -> Result<()> {
    let dir = TempDir::new()?;
    let chunks = [
        "id,t,lat,lon,sst,slp,battery,drogue\n".to_string(),
        drifter_line(1, 0),
        format!("{}{}", drifter_line(2, 0), &drifter_line(1, 5)[..10]),
        format!("{}{}", &drifter_line(1, 5)[10..], drifter_line(3, 0)),
        "garbage\n".to_string(),
        drifter_line(2, 5),
    ];

    let incremental = drifter_coordinator();
    let growing = create(&dir, "drifter.1.csv", "");
    let mut last_offset = 0;
    for chunk in &chunks {
        append(&growing, chunk);
        let report = incremental.ingest(&growing).await?;
        assert!(report.new_offset >= last_offset);
        last_offset = report.new_offset;
    }

    let once = drifter_coordinator();
    let whole = create(&dir, "drifter.2.csv", &chunks.concat());
    once.ingest(&whole).await?;

    assert_eq!(ids(&incremental.store().rows()), ids(&once.store().rows()));
    assert_eq!(incremental.store().rows().len(), 5);
    assert_eq!(
        incremental.store().offset(&growing),
        Some(std::fs::metadata(&growing)?.len())
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_commit_replays_without_duplicates() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(&dir, "drifter.1.csv", &drifter_line(1, 0));
    let coordinator = drifter_coordinator();
    coordinator.ingest(&path).await?;

    append(&path, &format!("{}{}", drifter_line(2, 0), drifter_line(3, 0)));
    let committed = coordinator.store().offset(&path);

    coordinator.store().fail_next_commit();
    let err = coordinator.ingest(&path).await.unwrap_err();
    assert!(matches!(err, IngestError::Rejected { .. }));
    assert!(!err.is_fatal());
    assert_eq!(coordinator.store().offset(&path), committed);
    assert_eq!(coordinator.store().rows().len(), 1);

    let retry = coordinator.ingest(&path).await?;
    assert_eq!(retry.prior_offset, committed.unwrap());
    assert_eq!(retry.rows, 2);
    assert_eq!(coordinator.store().rows().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_replay_after_lost_cursor_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let content = format!("{}{}", drifter_line(1, 0), drifter_line(2, 0));
    let path = create(&dir, "drifter.1.csv", &content);
    let coordinator = drifter_coordinator();

    coordinator.ingest(&path).await?;
    coordinator.store().reset(&path).await?;
    let replay = coordinator.ingest(&path).await?;

    assert_eq!(replay.rows, 2);
    assert_eq!(replay.written, 0);
    assert_eq!(coordinator.store().rows().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_short_row_is_skipped_and_offset_advances() -> Result<()> {
    let dir = TempDir::new()?;
    let short = "1,2021-01-01T00:00:00,10.0,20.0,1.0\n";
    let path = create(&dir, "drifter.1.csv", short);
    let coordinator = drifter_coordinator();

    let report = coordinator.ingest(&path).await?;
    assert_eq!(report.rows, 0);
    assert_eq!(report.skipped, 1);
    assert!(report.committed);
    assert_eq!(coordinator.store().offset(&path), Some(short.len() as u64));
    assert!(coordinator.store().rows().is_empty());

    // Nothing new, nothing written
    let again = coordinator.ingest(&path).await?;
    assert!(!again.committed);
    assert_eq!(coordinator.store().commit_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_key_first_wins_for_drifters() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(
        &dir,
        "drifter.1.csv",
        "7,2024-05-01T12:00:00,17.0,134.0,29.0,1009.0,7.9,188\n\
         7,2024-05-01T12:00:00,18.0,135.0,29.0,1009.0,7.9,188\n",
    );
    let coordinator = drifter_coordinator();
    coordinator.ingest(&path).await?;

    let rows = coordinator.store().rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].lat, Some(17.0));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_key_latest_wins_for_scs() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(
        &dir,
        "TSG-RAW_20230501-000000.Raw",
        "05/01/2023,00:00:01.100,28.9,5.7,34.80\n",
    );
    let coordinator: IngestCoordinator<ScsDecoder, MemoryStore<ScsRow>> =
        IngestCoordinator::new(ScsDecoder, Arc::new(MemoryStore::new()));
    coordinator.ingest(&path).await?;

    // Rounds to the same second as the first reading
    append(&path, "05/01/2023,00:00:00.900,29.0,5.8,34.95\n");
    coordinator.ingest(&path).await?;

    let rows = coordinator.store().rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values["salinity"].as_f64(), Some(34.95));
    Ok(())
}

#[tokio::test]
async fn test_unknown_scs_file_fails_without_moving_cursor() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(&dir, "NOTASENSOR_20230501-000000.Raw", "x\n");
    let coordinator: IngestCoordinator<ScsDecoder, MemoryStore<ScsRow>> =
        IngestCoordinator::new(ScsDecoder, Arc::new(MemoryStore::new()));

    let err = coordinator.ingest(&path).await.unwrap_err();
    assert!(matches!(err, IngestError::Decode { .. }));
    assert_eq!(coordinator.store().offset(&path), None);
    Ok(())
}

#[tokio::test]
async fn test_shrunk_file_keeps_cursor() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(
        &dir,
        "drifter.1.csv",
        &format!("{}{}", drifter_line(1, 0), drifter_line(2, 0)),
    );
    let coordinator = drifter_coordinator();
    let first = coordinator.ingest(&path).await?;

    std::fs::write(&path, drifter_line(9, 0))?;
    let report = coordinator.ingest(&path).await?;

    assert!(!report.committed);
    assert_eq!(coordinator.store().offset(&path), Some(first.new_offset));
    assert_eq!(coordinator.store().rows().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_bad_glider_line_mid_file_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(
        &dir,
        "osu684.csv",
        "time,lat,lon\n1731974400,17.5,134.2\nnan,17.6,134.3\n1731974500,17.7,134.4\n",
    );
    let coordinator: IngestCoordinator<SfmcDecoder, MemoryStore<SfmcRow>> =
        IngestCoordinator::new(SfmcDecoder, Arc::new(MemoryStore::new()));

    let report = coordinator.ingest(&path).await?;
    assert_eq!(report.rows, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(
        coordinator.store().offset(&path),
        Some(std::fs::metadata(&path)?.len())
    );

    append(&path, "garbage\n1731974600,17.8,134.5\n");
    let next = coordinator.ingest(&path).await?;
    assert_eq!(next.rows, 1);

    let times: Vec<i64> = coordinator
        .store()
        .rows()
        .iter()
        .map(|r| r.time.timestamp())
        .collect();
    assert_eq!(times, vec![1_731_974_400, 1_731_974_500, 1_731_974_600]);
    Ok(())
}

#[tokio::test]
async fn test_reordered_glider_header_fails_without_moving_cursor() -> Result<()> {
    let dir = TempDir::new()?;
    let path = create(&dir, "osu684.csv", "time,lon,lat\n1731974400,134.2,17.5\n");
    let coordinator: IngestCoordinator<SfmcDecoder, MemoryStore<SfmcRow>> =
        IngestCoordinator::new(SfmcDecoder, Arc::new(MemoryStore::new()));

    let err = coordinator.ingest(&path).await.unwrap_err();
    assert!(matches!(err, IngestError::Decode { .. }));
    assert_eq!(coordinator.store().offset(&path), None);
    Ok(())
}

#[tokio::test]
async fn test_reset_through_parent_segments_finds_cursor() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir(dir.path().join("Drifter"))?;
    let path = create(&dir, "Drifter/drifter.1.csv", &drifter_line(1, 0));
    let coordinator = drifter_coordinator();
    let first = coordinator.ingest(&path).await?;

    let dotted = dir
        .path()
        .join("Drifter")
        .join("..")
        .join("Drifter")
        .join("drifter.1.csv");
    assert_eq!(coordinator.store().offset(&dotted), Some(first.new_offset));
    assert!(coordinator.store().reset(&resolve_path(&dotted)?).await?);
    assert_eq!(coordinator.store().offset(&path), Some(0));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_reprocess_through_symlinked_directory() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir(dir.path().join("real"))?;
    let path = create(&dir, "real/drifter.1.csv", &drifter_line(1, 0));
    let link = dir.path().join("link");
    std::os::unix::fs::symlink(dir.path().join("real"), &link)?;

    let coordinator = drifter_coordinator();
    coordinator.ingest(&path).await?;

    let replay = coordinator.reprocess(&link.join("drifter.1.csv")).await?;
    assert_eq!(replay.prior_offset, 0);
    assert_eq!(replay.rows, 1);
    assert_eq!(replay.written, 0);
    assert_eq!(replay.path, path.canonicalize()?);

    // Nothing new through either spelling
    let again = coordinator.ingest(&link.join("drifter.1.csv")).await?;
    assert!(!again.committed);
    assert_eq!(coordinator.store().rows().len(), 1);
    Ok(())
}

//! Tests for the metrics module.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use strata::metrics::{BATCHES_READ, FRAGMENTS_SCANNED, MetricsCollector, ROWS_READ};
use strata::prelude::*;
use strata::testing::example_table;

#[test]
fn test_counters_accumulate_across_threads() {
    let metrics = MetricsCollector::new();
    std::thread::scope(|s| {
        for _ in 0..8 {
            let metrics = metrics.clone();
            s.spawn(move || {
                for _ in 0..100 {
                    metrics.increment_counter(ROWS_READ, 1);
                }
            });
        }
    });
    assert_eq!(metrics.counter(ROWS_READ), 800);
}

#[test]
fn test_snapshot_is_a_copy() {
    let metrics = MetricsCollector::new();
    metrics.set_counter("custom", 5);
    let snapshot = metrics.snapshot();
    metrics.increment_counter("custom", 1);
    assert_eq!(snapshot.get("custom"), Some(&5));
    assert_eq!(metrics.counter("custom"), 6);
}

#[test]
fn test_scan_reports_timing_and_counters() -> Result<()> {
    let scanner = Arc::new(InMemoryDataset::from_table(example_table()))
        .new_scan()
        .batch_size(3)
        .finish()?;
    scanner.to_table()?;

    let metrics = scanner.metrics();
    assert_eq!(metrics.counter(FRAGMENTS_SCANNED), 1);
    assert_eq!(metrics.counter(BATCHES_READ), 4);
    assert_eq!(metrics.counter(ROWS_READ), 10);
    assert!(metrics.elapsed().is_some());

    let report = metrics.to_json();
    assert_eq!(report["counters"][ROWS_READ], json!(10));
    assert!(report["elapsed_ms"].is_number());
    Ok(())
}

#[test]
fn test_save_to_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.json");
    let path = path.to_string_lossy();

    let metrics = MetricsCollector::new();
    metrics.increment_counter(BATCHES_READ, 2);
    metrics.save_to_file(&path)?;

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&*path)?)?;
    assert_eq!(saved["counters"][BATCHES_READ], json!(2));
    Ok(())
}

#[test]
fn test_failed_scan_still_closes_timing() -> Result<()> {
    let scanner = Arc::new(InMemoryDataset::from_table(example_table()))
        .new_scan()
        .memory_limit(16)
        .finish()?;
    let err = scanner.to_table().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(scanner.metrics().elapsed().is_some());
    assert!(scanner.metrics().to_json()["elapsed_ms"].is_number());
    Ok(())
}

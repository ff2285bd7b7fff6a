//! Walkthrough of discovery, scanning and partitioned writing.
//!
//! This example:
//! - writes a small two-file Parquet dataset
//! - discovers it with Hive partition inference
//! - prints the fragments and scans everything into a table
//! - writes the table back out partitioned by column `a`
//!
//! Run with: `cargo run --example dataset_tutorial [work-dir]`
//! (`RUST_LOG=strata=debug` shows per-file events). Without a directory
//! argument everything happens in a temporary directory.

use anyhow::{Context, Result};
use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;
use strata::prelude::*;
use strata::testing::{example_table, write_example_parquet_dataset};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let scratch = tempfile::tempdir().context("create scratch directory")?;
    let work_dir = std::env::args()
        .nth(1)
        .map_or_else(|| scratch.path().to_path_buf(), Into::into);

    // A filesystem rooted at `/` plus the working directory inside it.
    let (fs, root) = from_uri_or_path(&work_dir.to_string_lossy())?;
    let dataset_dir = write_example_parquet_dataset(&fs, &root)?;
    println!("Source table:\n{}", example_table().to_pretty_string()?);

    // Discover: recursive listing, Hive keys inferred from directory names.
    let factory = FileSystemDatasetFactory::make(
        Arc::clone(&fs),
        FileSelector::new(&dataset_dir).recursive(true),
        Arc::new(ParquetFileFormat::default()),
        FileSystemFactoryOptions {
            partitioning: HivePartitioning::factory().into(),
            ..Default::default()
        },
    )?;
    let read_dataset = factory.finish()?;
    for fragment in read_dataset.get_fragments(&Expression::literal(true)) {
        println!("Found fragment: {fragment}");
        println!("Partition expression: {}", fragment.partition_expression());
    }

    // Everything into memory.
    let table = read_dataset.new_scan().finish()?.to_table()?;
    println!("{table}");

    // Back out to disk, one directory per value of `a`.
    let write_scanner = Arc::new(InMemoryDataset::from_table(table))
        .new_scan()
        .finish()?;
    let partition_schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Utf8, true)]));
    let write_format = Arc::new(ParquetFileFormat::default());
    let mut write_options = FileSystemDatasetWriteOptions::new(
        Arc::clone(&fs),
        strata::fs::path::join(&root, "write_dataset"),
        write_format,
    );
    write_options.partitioning = Arc::new(HivePartitioning::new(partition_schema));
    write_options.basename_template = "part{i}.parquet".to_string();
    write_options.existing_data_behavior = ExistingDataBehavior::OverwriteOrIgnore;
    let summary = FileSystemDataset::write(&write_options, &write_scanner)?;

    for file in &summary.files {
        println!("Wrote {} ({} rows)", file.path, file.rows);
    }
    println!(
        "{} files, {} rows, metrics {}",
        summary.files.len(),
        summary.total_rows,
        write_scanner.metrics().to_json()
    );
    Ok(())
}

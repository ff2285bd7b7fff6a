use anyhow::Result;
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use strata::format::{CsvWriteOptions, FileWriteOptions};
use strata::fs::{FileSelector, FileSystem, MemoryFileSystem};
use strata::metrics::{FILES_WRITTEN, ROWS_WRITTEN};
use strata::prelude::*;
use strata::testing::{example_table, sorted_rows};
use strata::{Error, ExecMode, write_batches};

fn key_schema(name: &str, data_type: DataType) -> Arc<Schema> {
    Arc::new(Schema::new(vec![Field::new(name, data_type, true)]))
}

fn source_scanner() -> Result<Scanner> {
    Ok(Arc::new(InMemoryDataset::from_table(example_table()))
        .new_scan()
        .finish()?)
}

fn csv_options(memory: &MemoryFileSystem, base_dir: &str) -> FileSystemDatasetWriteOptions {
    let fs: Arc<dyn FileSystem> = Arc::new(memory.clone());
    FileSystemDatasetWriteOptions::new(fs, base_dir, Arc::new(CsvFileFormat::default()))
}

fn by_c(mut options: FileSystemDatasetWriteOptions) -> FileSystemDatasetWriteOptions {
    options.partitioning = Arc::new(HivePartitioning::new(key_schema("c", DataType::Int64)));
    options
}

#[test]
fn hive_write_creates_one_directory_per_key() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let fs: Arc<dyn FileSystem> = Arc::new(memory.clone());
    let mut options = FileSystemDatasetWriteOptions::new(
        Arc::clone(&fs),
        "write_dataset",
        Arc::new(ParquetFileFormat::default()),
    );
    options.partitioning = Arc::new(HivePartitioning::new(key_schema("a", DataType::Utf8)));
    options.basename_template = "part{i}.parquet".to_string();
    options.existing_data_behavior = ExistingDataBehavior::OverwriteOrIgnore;

    let scanner = source_scanner()?;
    let summary = FileSystemDataset::write(&options, &scanner)?;
    assert_eq!(summary.total_rows, 10);
    assert_eq!(summary.files.len(), 10);
    assert_eq!(summary.files[0].path, "write_dataset/a=0/part0.parquet");
    assert_eq!(summary.files[9].path, "write_dataset/a=9/part0.parquet");
    assert_eq!(summary.files[3].partition_expression.to_string(), "(a == \"3\")");
    assert!(summary.files.iter().all(|f| f.rows == 1));
    assert_eq!(scanner.metrics().counter(FILES_WRITTEN), 10);
    assert_eq!(scanner.metrics().counter(ROWS_WRITTEN), 10);

    let dataset = FileSystemDatasetFactory::make(
        fs,
        FileSelector::new("write_dataset").recursive(true),
        Arc::new(ParquetFileFormat::default()),
        FileSystemFactoryOptions {
            partitioning: HivePartitioning::factory().into(),
            ..Default::default()
        },
    )?
    .finish()?;
    assert_eq!(dataset.schema().field(2).name(), "a");
    let table = dataset.new_scan().project(["a", "b", "c"]).finish()?.to_table()?;
    assert_eq!(sorted_rows(&table)?, sorted_rows(&example_table())?);
    Ok(())
}

#[test]
fn key_columns_are_not_stored_in_files() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let options = by_c(csv_options(&memory, "out"));
    let summary = write_dataset(&options, &source_scanner()?)?;
    assert_eq!(summary.paths(), vec!["out/c=1/part-0.csv", "out/c=2/part-0.csv"]);

    let text = String::from_utf8(memory.read("out/c=1/part-0.csv")?.to_vec())?;
    assert_eq!(text.lines().next(), Some("a,b"));
    assert_eq!(text.lines().count(), 6);
    Ok(())
}

#[test]
fn basename_templates_are_validated() -> Result<()> {
    let memory = MemoryFileSystem::new();
    for template in ["part.csv", "part-{i}-{i}.csv", "sub/part-{i}.csv"] {
        let mut options = csv_options(&memory, "out");
        options.basename_template = template.to_string();
        let err = write_dataset(&options, &source_scanner()?).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid, "template {template}");
    }
    assert_eq!(memory.file_count(), 0);
    Ok(())
}

#[test]
fn options_for_another_format_are_rejected() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let fs: Arc<dyn FileSystem> = Arc::new(memory);
    let mut options =
        FileSystemDatasetWriteOptions::new(fs, "out", Arc::new(ParquetFileFormat::default()));
    options.file_write_options = FileWriteOptions::Csv(CsvWriteOptions::default());
    let err = write_dataset(&options, &source_scanner()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    Ok(())
}

#[test]
fn existing_files_fail_the_default_policy_untouched() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let options = by_c(csv_options(&memory, "out"));
    write_dataset(&options, &source_scanner()?)?;
    let before = memory.read("out/c=1/part-0.csv")?;

    let err = write_dataset(&options, &source_scanner()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(memory.read("out/c=1/part-0.csv")?, before);
    assert_eq!(memory.file_count(), 2);
    Ok(())
}

#[test]
fn overwrite_or_ignore_replaces_only_colliding_names() -> Result<()> {
    let memory = MemoryFileSystem::new();
    memory.put("out/c=1/part-0.csv", "stale");
    memory.put("out/c=1/extra.csv", "a,b\n100,100\n");

    let mut options = by_c(csv_options(&memory, "out"));
    options.existing_data_behavior = ExistingDataBehavior::OverwriteOrIgnore;
    write_dataset(&options, &source_scanner()?)?;

    let rewritten = String::from_utf8(memory.read("out/c=1/part-0.csv")?.to_vec())?;
    assert!(rewritten.starts_with("a,b\n0,9"));
    assert!(memory.read("out/c=1/extra.csv").is_ok());
    assert_eq!(memory.file_count(), 3);
    Ok(())
}

#[test]
fn delete_matching_clears_written_partitions_only() -> Result<()> {
    let memory = MemoryFileSystem::new();
    memory.put("out/c=1/old-0.csv", "a,b\n100,100\n");
    memory.put("out/c=3/old-0.csv", "a,b\n300,300\n");

    let mut options = by_c(csv_options(&memory, "out"));
    options.existing_data_behavior = ExistingDataBehavior::DeleteMatching;
    write_dataset(&options, &source_scanner()?)?;

    assert!(memory.read("out/c=1/old-0.csv").is_err());
    assert!(memory.read("out/c=1/part-0.csv").is_ok());
    assert!(memory.read("out/c=3/old-0.csv").is_ok());
    Ok(())
}

#[test]
fn files_roll_over_at_the_row_limit() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let mut options = csv_options(&memory, "out");
    options.max_rows_per_file = 3;
    let summary = write_dataset(&options, &source_scanner()?)?;
    assert_eq!(
        summary.paths(),
        vec!["out/part-0.csv", "out/part-1.csv", "out/part-2.csv", "out/part-3.csv"]
    );
    let rows: Vec<u64> = summary.files.iter().map(|f| f.rows).collect();
    assert_eq!(rows, vec![3, 3, 3, 1]);
    Ok(())
}

#[test]
fn partition_limit_is_enforced() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let mut options = by_c(csv_options(&memory, "out"));
    options.max_partitions = 1;
    let err = write_dataset(&options, &source_scanner()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    Ok(())
}

#[test]
fn key_columns_must_exist() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let mut options = csv_options(&memory, "out");
    options.partitioning = Arc::new(HivePartitioning::new(key_schema("zzz", DataType::Utf8)));
    let err = write_dataset(&options, &source_scanner()?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    Ok(())
}

#[test]
fn input_errors_abort_the_write() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let options = by_c(csv_options(&memory, "out"));
    let batch = example_table().concat()?;
    let err = write_batches(
        &options,
        batch.schema(),
        vec![Ok(batch.clone()), Err(Error::invalid("upstream failed"))],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.to_string().contains("upstream failed"));
    Ok(())
}

#[test]
fn sequential_and_parallel_writes_agree() -> Result<()> {
    let sequential = MemoryFileSystem::new();
    let mut options = by_c(csv_options(&sequential, "out"));
    options.exec_mode = ExecMode::Sequential;
    options.max_rows_per_file = 2;
    let a = write_dataset(&options, &source_scanner()?)?;

    let parallel = MemoryFileSystem::new();
    let mut options = by_c(csv_options(&parallel, "out"));
    options.max_rows_per_file = 2;
    let b = write_dataset(&options, &source_scanner()?)?;

    assert_eq!(a.paths(), b.paths());
    for path in a.paths() {
        assert_eq!(sequential.read(path)?, parallel.read(path)?);
    }
    Ok(())
}

#[test]
fn null_keys_do_not_share_a_directory_with_their_sentinel() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let mut options = csv_options(&memory, "out");
    options.partitioning = Arc::new(HivePartitioning::new(key_schema("k", DataType::Utf8)));
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, true),
        Field::new("v", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![
            Arc::new(StringArray::from(vec![None, Some("__HIVE_DEFAULT_PARTITION__")])),
            Arc::new(Int64Array::from(vec![1, 2])),
        ],
    )?;
    let err = write_batches(&options, schema, vec![Ok(batch)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(memory.file_count(), 0);
    Ok(())
}

#[test]
fn null_keys_round_trip() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let mut options = csv_options(&memory, "out");
    options.partitioning = Arc::new(HivePartitioning::new(key_schema("k", DataType::Utf8)));
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, true),
        Field::new("v", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![
            Arc::new(StringArray::from(vec![None, Some("x"), None])),
            Arc::new(Int64Array::from(vec![1, 2, 3])),
        ],
    )?;
    let summary = write_batches(&options, schema, vec![Ok(batch)])?;
    assert_eq!(
        summary.paths(),
        vec!["out/k=__HIVE_DEFAULT_PARTITION__/part-0.csv", "out/k=x/part-0.csv"]
    );
    assert_eq!(summary.files[0].rows, 2);
    assert_eq!(memory.file_count(), 2);
    Ok(())
}

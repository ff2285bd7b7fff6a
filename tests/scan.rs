use anyhow::Result;
use arrow::array::{AsArray, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strata::dataset::FragmentIter;
use strata::format::{FileWriteOptions, ParquetWriteOptions, RecordBatchIter, ScanRequest};
use strata::fragment::Fragment;
use strata::fs::{FileSelector, FileSystem, MemoryFileSystem};
use strata::metrics::{
    FRAGMENTS_PRUNED, FRAGMENTS_SCANNED, ROW_GROUPS_PRUNED, ROW_GROUPS_TOTAL, ROWS_READ,
};
use strata::prelude::*;
use strata::testing::{example_table, sorted_rows, temp_local_fs, write_example_parquet_dataset};
use strata::{CancellationToken, EngineConfig, ExecMode};

fn tutorial_dataset() -> Result<(tempfile::TempDir, Arc<FileSystemDataset>)> {
    let (dir, fs) = temp_local_fs()?;
    let base = write_example_parquet_dataset(&fs, "")?;
    let dataset = FileSystemDatasetFactory::make(
        fs,
        FileSelector::new(base).recursive(true),
        Arc::new(ParquetFileFormat::default()),
        FileSystemFactoryOptions::default(),
    )?
    .finish()?;
    Ok((dir, dataset))
}

/// Example table written as CSV with one hive directory per value of `c`.
fn hive_dataset() -> Result<Arc<FileSystemDataset>> {
    let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
    let source = Arc::new(InMemoryDataset::from_table(example_table()));
    let mut options =
        FileSystemDatasetWriteOptions::new(Arc::clone(&fs), "ds", Arc::new(CsvFileFormat::default()));
    options.partitioning = Arc::new(HivePartitioning::new(Arc::new(Schema::new(vec![
        Field::new("c", DataType::Int64, true),
    ]))));
    write_dataset(&options, &source.new_scan().finish()?)?;
    Ok(FileSystemDatasetFactory::make(
        fs,
        FileSelector::new("ds").recursive(true),
        Arc::new(CsvFileFormat::default()),
        FileSystemFactoryOptions {
            partitioning: HivePartitioning::factory().into(),
            ..Default::default()
        },
    )?
    .finish()?)
}

fn int_column(table: &Table, name: &str) -> Result<Vec<i64>> {
    let column = table.column(name)?;
    Ok(column.as_primitive::<Int64Type>().values().to_vec())
}

#[test]
fn projection_and_filter_are_applied() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let table = dataset
        .new_scan()
        .project(["b"])
        .filter(field("a").greater(lit(7)))
        .finish()?
        .to_table()?;
    assert_eq!(table.num_columns(), 1);
    assert_eq!(table.schema().field(0).name(), "b");
    assert_eq!(int_column(&table, "b")?, vec![1, 0]);
    Ok(())
}

#[test]
fn projection_order_is_kept() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let scanner = dataset.new_scan().project(["c", "a"]).finish()?;
    let names: Vec<&str> = scanner
        .projected_schema()
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect();
    assert_eq!(names, vec!["c", "a"]);
    let table = scanner.to_table()?;
    assert_eq!(int_column(&table, "a")?, (0..10).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn invalid_scan_options_are_rejected() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let kind = |builder: ScannerBuilder| builder.finish().err().map(|e| e.kind());
    assert_eq!(kind(dataset.new_scan().project(["zzz"])), Some(ErrorKind::Invalid));
    assert_eq!(kind(dataset.new_scan().project(["a", "a"])), Some(ErrorKind::Invalid));
    assert_eq!(
        kind(dataset.new_scan().filter(field("zzz").equal(lit(1)))),
        Some(ErrorKind::Invalid)
    );
    assert_eq!(kind(dataset.new_scan().batch_size(0)), Some(ErrorKind::Invalid));
    assert_eq!(
        kind(dataset.new_scan().exec_mode(ExecMode::Parallel { threads: Some(0) })),
        Some(ErrorKind::Invalid)
    );
    Ok(())
}

#[test]
fn partition_filters_prune_whole_fragments() -> Result<()> {
    let dataset = hive_dataset()?;
    let scanner = dataset.new_scan().filter(field("c").equal(lit(2))).finish()?;
    let table = scanner.to_table()?;
    assert_eq!(int_column(&table, "a")?, vec![1, 3, 5, 7, 9]);
    assert_eq!(int_column(&table, "c")?, vec![2; 5]);

    let metrics = scanner.metrics();
    assert_eq!(metrics.counter(FRAGMENTS_PRUNED), 1);
    assert_eq!(metrics.counter(FRAGMENTS_SCANNED), 1);
    assert_eq!(metrics.counter(ROWS_READ), 5);
    Ok(())
}

#[test]
fn filters_mixing_keys_and_columns() -> Result<()> {
    let dataset = hive_dataset()?;
    let filter = field("c").equal(lit(1)).and(field("b").less(lit(5)));
    let scanner = dataset.new_scan().filter(filter).finish()?;
    assert_eq!(scanner.count_rows()?, 2);
    let table = scanner.to_table()?;
    assert_eq!(int_column(&table, "a")?, vec![6, 8]);
    Ok(())
}

#[test]
fn row_groups_are_skipped_by_statistics() -> Result<()> {
    let memory = MemoryFileSystem::new();
    let fs: Arc<dyn FileSystem> = Arc::new(memory);
    let format = ParquetFileFormat::default();
    let batch = example_table().concat()?;
    let options = FileWriteOptions::Parquet(ParquetWriteOptions {
        max_row_group_size: 2,
        ..ParquetWriteOptions::default()
    });
    format.write_fragment(
        &mut std::iter::once(Ok::<_, strata::Error>(batch.clone())),
        batch.schema(),
        fs.open_output_stream("ds/part-0.parquet")?,
        &options,
    )?;

    let dataset = FileSystemDatasetFactory::make(
        fs,
        FileSelector::new("ds"),
        Arc::new(format),
        FileSystemFactoryOptions::default(),
    )?
    .finish()?;
    let scanner = dataset
        .new_scan()
        .filter(field("a").greater_equal(lit(7)))
        .finish()?;
    let table = scanner.to_table()?;
    assert_eq!(int_column(&table, "a")?, vec![7, 8, 9]);
    assert_eq!(scanner.metrics().counter(ROW_GROUPS_TOTAL), 5);
    assert_eq!(scanner.metrics().counter(ROW_GROUPS_PRUNED), 3);
    assert_eq!(scanner.metrics().counter(ROWS_READ), 4);
    Ok(())
}

/// One parquet file of `batch` with two rows per row group, discovered with
/// row-group pruning switched on or off.
fn parquet_dataset(batch: &RecordBatch, pruning: bool) -> Result<Arc<FileSystemDataset>> {
    let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
    let format = ParquetFileFormat::default().with_row_group_pruning(pruning);
    let options = FileWriteOptions::Parquet(ParquetWriteOptions {
        max_row_group_size: 2,
        ..ParquetWriteOptions::default()
    });
    format.write_fragment(
        &mut std::iter::once(Ok::<_, strata::Error>(batch.clone())),
        batch.schema(),
        fs.open_output_stream("ds/part-0.parquet")?,
        &options,
    )?;
    Ok(FileSystemDatasetFactory::make(
        fs,
        FileSelector::new("ds"),
        Arc::new(format),
        FileSystemFactoryOptions::default(),
    )?
    .finish()?)
}

#[test]
fn nan_rows_survive_float_filters() -> Result<()> {
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Float64, true)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(Float64Array::from(vec![1.0, f64::NAN, 2.0, 3.0]))],
    )?;
    let filter = field("x").greater(lit(5.0));

    let unpruned = parquet_dataset(&batch, false)?
        .new_scan()
        .filter(filter.clone())
        .finish()?
        .to_table()?;
    let scanner = parquet_dataset(&batch, true)?.new_scan().filter(filter).finish()?;
    let pruned = scanner.to_table()?;
    assert_eq!(pruned.num_rows(), 1);
    assert_eq!(sorted_rows(&pruned)?, sorted_rows(&unpruned)?);
    assert_eq!(scanner.metrics().counter(ROW_GROUPS_PRUNED), 0);
    Ok(())
}

#[test]
fn all_null_row_groups_are_skipped() -> Result<()> {
    let schema = Arc::new(Schema::new(vec![Field::new("y", DataType::Int64, true)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from(vec![None, None, Some(1), Some(7)]))],
    )?;
    let scanner = parquet_dataset(&batch, true)?
        .new_scan()
        .filter(field("y").greater(lit(0)))
        .finish()?;
    assert_eq!(int_column(&scanner.to_table()?, "y")?, vec![1, 7]);
    assert_eq!(scanner.metrics().counter(ROW_GROUPS_PRUNED), 1);

    let nulls = parquet_dataset(&batch, true)?
        .new_scan()
        .filter(is_null(field("y")))
        .finish()?;
    assert_eq!(nulls.count_rows()?, 2);
    Ok(())
}

#[test]
fn missing_columns_are_null_filled() -> Result<()> {
    let memory = MemoryFileSystem::new();
    memory.put("ds/one.csv", "x,y\n1,a\n");
    memory.put("ds/two.csv", "x\n2\n");
    let dataset = FileSystemDatasetFactory::make(
        Arc::new(memory),
        FileSelector::new("ds"),
        Arc::new(CsvFileFormat::default()),
        FileSystemFactoryOptions::default(),
    )?
    .finish()?;
    let table = dataset.new_scan().finish()?.to_table()?;
    let y = table.column("y")?;
    assert_eq!(y.len(), 2);
    assert_eq!(y.null_count(), 1);
    assert_eq!(
        sorted_rows(&table)?,
        vec![
            vec!["1".to_string(), "a".to_string()],
            vec!["2".to_string(), String::new()],
        ]
    );
    Ok(())
}

#[test]
fn count_rows_and_head() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let all = dataset.new_scan().finish()?;
    assert_eq!(all.count_rows()?, 10);

    let even = dataset.new_scan().filter(field("c").equal(lit(1))).finish()?;
    assert_eq!(even.count_rows()?, 5);

    let head = dataset.new_scan().batch_size(2).finish()?.head(3)?;
    assert_eq!(head.num_rows(), 3);
    assert_eq!(int_column(&head, "a")?, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn batches_stream_lazily_within_the_size_limit() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let scanner = dataset.new_scan().batch_size(2).finish()?;
    let stream = scanner.to_batches();
    assert_eq!(stream.schema(), scanner.projected_schema());
    let sizes = stream
        .map(|b| b.map(|b| b.num_rows()))
        .collect::<strata::Result<Vec<_>>>()?;
    assert_eq!(sizes, vec![2, 2, 1, 2, 2, 1]);
    Ok(())
}

#[test]
fn scans_are_repeatable() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let scanner = dataset.new_scan().filter(field("a").less(lit(3))).finish()?;
    let first = scanner.to_table()?;
    let second = scanner.to_table()?;
    assert_eq!(sorted_rows(&first)?, sorted_rows(&second)?);
    Ok(())
}

#[test]
fn cancelled_scans_stop_with_cancelled() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let token = CancellationToken::new();
    let scanner = dataset
        .new_scan()
        .cancellation_token(token.clone())
        .finish()?;
    token.cancel();
    assert_eq!(scanner.to_table().unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(scanner.to_batches().next().is_some_and(|b| b.is_err()));
    Ok(())
}

#[test]
fn memory_limit_fails_the_materialisation() -> Result<()> {
    let (_dir, dataset) = tutorial_dataset()?;
    let err = dataset
        .new_scan()
        .memory_limit(16)
        .finish()?
        .to_table()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    let config = EngineConfig {
        memory_limit: Some(64 * 1024 * 1024),
        batch_size: 4,
        ..EngineConfig::default()
    };
    let table = dataset.new_scan().config(&config).finish()?.to_table()?;
    assert_eq!(table.num_rows(), 10);
    assert!(table.batches().iter().all(|b| b.num_rows() <= 4));
    Ok(())
}

/// A fragment that takes `delay` to produce its single batch.
#[derive(Debug)]
struct SlowFragment {
    batch: RecordBatch,
    delay: Duration,
    expression: Expression,
}

impl fmt::Display for SlowFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slow fragment ({:?})", self.delay)
    }
}

impl Fragment for SlowFragment {
    fn partition_expression(&self) -> &Expression {
        &self.expression
    }

    fn read_physical_schema(&self) -> strata::Result<SchemaRef> {
        Ok(self.batch.schema())
    }

    fn scan(&self, _request: &ScanRequest) -> strata::Result<RecordBatchIter> {
        std::thread::sleep(self.delay);
        Ok(Box::new(std::iter::once(Ok::<_, strata::Error>(
            self.batch.clone(),
        ))))
    }
}

#[derive(Debug)]
struct SlowDataset {
    schema: SchemaRef,
    fragments: Vec<Arc<SlowFragment>>,
}

impl SlowDataset {
    fn new(delays_ms: &[u64]) -> Result<Self> {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let fragments = delays_ms
            .iter()
            .zip(0i64..)
            .map(|(&ms, id)| {
                let batch = RecordBatch::try_new(
                    Arc::clone(&schema),
                    vec![Arc::new(Int64Array::from(vec![id]))],
                )?;
                Ok(Arc::new(SlowFragment {
                    batch,
                    delay: Duration::from_millis(ms),
                    expression: Expression::literal(true),
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { schema, fragments })
    }
}

impl Dataset for SlowDataset {
    fn type_name(&self) -> &'static str {
        "slow"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn all_fragments(&self) -> FragmentIter<'_> {
        Box::new(
            self.fragments
                .iter()
                .map(|f| Arc::clone(f) as Arc<dyn Fragment>),
        )
    }
}

#[test]
fn parallel_results_follow_fragment_order() -> Result<()> {
    let dataset: Arc<dyn Dataset> = Arc::new(SlowDataset::new(&[60, 0, 30, 0])?);
    let table = ScannerBuilder::new(dataset)
        .exec_mode(ExecMode::Parallel { threads: Some(4) })
        .finish()?
        .to_table()?;
    assert_eq!(int_column(&table, "id")?, vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn sequential_and_parallel_scans_agree() -> Result<()> {
    let dataset = hive_dataset()?;
    let filter = field("b").greater(lit(2));
    let sequential = dataset
        .new_scan()
        .filter(filter.clone())
        .use_threads(false)
        .finish()?
        .to_table()?;
    let parallel = dataset.new_scan().filter(filter).finish()?.to_table()?;
    assert_eq!(sorted_rows(&sequential)?, sorted_rows(&parallel)?);
    assert_eq!(sequential.num_rows(), 7);
    Ok(())
}

//! Fixtures for tests, doc examples and demos.
//!
//! ```
//! use strata::testing::{example_table, sorted_rows};
//!
//! let table = example_table();
//! assert_eq!(table.num_rows(), 10);
//! assert_eq!(sorted_rows(&table)?[0], vec!["0", "9", "1"]);
//! # Ok::<(), strata::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::format::{FileFormat, FileWriteOptions, ParquetFileFormat, ParquetWriteOptions};
use crate::fs::{FileSystem, LocalFileSystem, path};
use crate::table::Table;
use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use std::sync::Arc;

/// Ten rows of three Int64 columns: `a` counts up from 0, `b` counts down
/// from 9 and `c` alternates 1, 2.
#[must_use]
pub fn example_table() -> Table {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, true),
        Field::new("b", DataType::Int64, true),
        Field::new("c", DataType::Int64, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(0..10)),
        Arc::new(Int64Array::from_iter_values((0..10).rev())),
        Arc::new(Int64Array::from_iter_values((0..10).map(|i| 1 + i % 2))),
    ];
    let batch = RecordBatch::try_new(schema, columns).expect("fixture columns match their schema");
    Table::from_batch(batch)
}

/// Write [`example_table`] under `{root}/parquet_dataset` as two Parquet
/// files of five rows each (`data1.parquet`, `data2.parquet`).
///
/// Returns the dataset directory.
///
/// # Errors
/// Filesystem or encoding failures.
pub fn write_example_parquet_dataset(fs: &Arc<dyn FileSystem>, root: &str) -> Result<String> {
    let base = path::join(root, "parquet_dataset");
    fs.create_dir(&base, true)?;
    let batch = example_table().concat()?;
    let format = ParquetFileFormat::default();
    let options = FileWriteOptions::Parquet(ParquetWriteOptions {
        max_row_group_size: 2048,
        ..ParquetWriteOptions::default()
    });
    for (name, offset) in [("data1.parquet", 0), ("data2.parquet", 5)] {
        let sink = fs.open_output_stream(&path::join(&base, name))?;
        let slice = batch.slice(offset, 5);
        format.write_fragment(
            &mut std::iter::once(Ok::<_, Error>(slice)),
            batch.schema(),
            sink,
            &options,
        )?;
    }
    Ok(base)
}

/// Every row rendered as strings, sorted, for order-insensitive comparisons.
///
/// # Errors
/// [`Error::Format`] if a value cannot be rendered.
pub fn sorted_rows(table: &Table) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::with_capacity(table.num_rows());
    for batch in table.batches() {
        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .map(|c| array_value_to_string(c, row).map_err(|e| Error::from_arrow("row", e)))
                .collect::<Result<Vec<_>>>()?;
            rows.push(cells);
        }
    }
    rows.sort();
    Ok(rows)
}

/// A local filesystem rooted in a fresh temporary directory. The directory is
/// removed when the returned guard drops.
///
/// # Errors
/// `Io` if the directory cannot be created.
pub fn temp_local_fs() -> Result<(tempfile::TempDir, Arc<dyn FileSystem>)> {
    let dir = tempfile::tempdir().map_err(|e| Error::io("create temporary directory", e))?;
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(dir.path()));
    Ok((dir, fs))
}

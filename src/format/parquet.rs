//! Parquet plugin.
//!
//! Inspection reads only the footer. Scans project by root column and skip
//! row groups whose min/max/null statistics rule out the filter.

use super::{FileFormat, FileSource, FileWriteOptions, FileWriter, RecordBatchIter, ScanRequest};
use crate::error::{Error, Result};
use crate::expression::{ColumnStatistics, ScalarValue};
use crate::fs::OutputStream;
use crate::metrics::{ROW_GROUPS_PRUNED, ROW_GROUPS_TOTAL};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::file::statistics::Statistics;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

const MAGIC: &[u8] = b"PAR1";

/// Page compression codec for written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl ParquetCompression {
    fn codec(self) -> Compression {
        match self {
            Self::Uncompressed => Compression::UNCOMPRESSED,
            Self::Snappy => Compression::SNAPPY,
            Self::Gzip => Compression::GZIP(GzipLevel::default()),
            Self::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Self::Lz4 => Compression::LZ4_RAW,
        }
    }
}

impl FromStr for ParquetCompression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uncompressed" | "none" => Ok(Self::Uncompressed),
            "snappy" => Ok(Self::Snappy),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "lz4" => Ok(Self::Lz4),
            other => Err(Error::invalid(format!("unknown parquet compression '{other}'"))),
        }
    }
}

/// Encoding parameters for new Parquet files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParquetWriteOptions {
    /// Rows per row group.
    pub max_row_group_size: usize,
    pub compression: ParquetCompression,
    /// Write column-chunk min/max/null statistics (needed for row-group pruning).
    pub statistics: bool,
}

impl Default for ParquetWriteOptions {
    fn default() -> Self {
        Self {
            max_row_group_size: 64 * 1024,
            compression: ParquetCompression::Snappy,
            statistics: true,
        }
    }
}

impl ParquetWriteOptions {
    fn properties(&self) -> WriterProperties {
        let stats = if self.statistics {
            EnabledStatistics::Chunk
        } else {
            EnabledStatistics::None
        };
        WriterProperties::builder()
            .set_max_row_group_row_count(Some(self.max_row_group_size.max(1)))
            .set_compression(self.compression.codec())
            .set_statistics_enabled(stats)
            .build()
    }
}

/// Apache Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetFileFormat {
    row_group_pruning: bool,
}

impl Default for ParquetFileFormat {
    fn default() -> Self {
        Self {
            row_group_pruning: true,
        }
    }
}

impl ParquetFileFormat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn statistics-based row-group skipping on or off.
    #[must_use]
    pub const fn with_row_group_pruning(mut self, enabled: bool) -> Self {
        self.row_group_pruning = enabled;
        self
    }
}

impl FileFormat for ParquetFileFormat {
    fn type_name(&self) -> &'static str {
        "parquet"
    }

    fn default_extension(&self) -> &'static str {
        "parquet"
    }

    fn is_supported(&self, source: &FileSource) -> Result<bool> {
        let file = source.open()?;
        let size = file.size();
        if size < 12 {
            return Ok(false);
        }
        let head = file.read_at(0, MAGIC.len())?;
        let tail = file.read_at(size - MAGIC.len() as u64, MAGIC.len())?;
        Ok(head.as_ref() == MAGIC && tail.as_ref() == MAGIC)
    }

    fn inspect(&self, source: &FileSource) -> Result<SchemaRef> {
        let file = source.open()?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::from_parquet(source.path(), e))?;
        Ok(builder.schema().clone())
    }

    fn scan(&self, source: &FileSource, request: &ScanRequest) -> Result<RecordBatchIter> {
        let path = source.path().to_string();
        let file = source.open()?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::from_parquet(path.clone(), e))?;
        let schema = builder.schema().clone();
        let metadata = builder.metadata().clone();

        let total = metadata.num_row_groups();
        let row_groups: Vec<usize> = if self.row_group_pruning && !request.filter.is_literal_true() {
            (0..total)
                .filter(|&i| {
                    let rg = metadata.row_group(i);
                    request
                        .filter
                        .might_match(&|name: &str| column_statistics(rg, &schema, name))
                })
                .collect()
        } else {
            (0..total).collect()
        };
        let pruned = total - row_groups.len();
        request.metrics.increment_counter(ROW_GROUPS_TOTAL, total as u64);
        request.metrics.increment_counter(ROW_GROUPS_PRUNED, pruned as u64);
        if pruned > 0 {
            debug!(path = %path, total, pruned, "skipped row groups by statistics");
        }

        let mut builder = builder
            .with_row_groups(row_groups)
            .with_batch_size(request.batch_size.max(1));
        if let Some(roots) = request.projection(&schema) {
            let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
            builder = builder.with_projection(mask);
        }
        let reader = builder
            .build()
            .map_err(|e| Error::from_parquet(path.clone(), e))?;
        Ok(Box::new(
            reader.map(move |batch| batch.map_err(|e| Error::from_arrow(path.clone(), e))),
        ))
    }

    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::Parquet(ParquetWriteOptions::default())
    }

    fn make_writer(
        &self,
        sink: Box<dyn OutputStream>,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>> {
        let FileWriteOptions::Parquet(opts) = options else {
            return Err(options.mismatch(self.type_name()));
        };
        let path = sink.path().to_string();
        let inner = ArrowWriter::try_new(sink, schema, Some(opts.properties()))
            .map_err(|e| Error::from_parquet(path.clone(), e))?;
        Ok(Box::new(ParquetWriter {
            inner,
            path,
            rows: 0,
        }))
    }
}

struct ParquetWriter {
    inner: ArrowWriter<Box<dyn OutputStream>>,
    path: String,
    rows: u64,
}

impl FileWriter for ParquetWriter {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.inner
            .write(batch)
            .map_err(|e| Error::from_parquet(self.path.clone(), e))?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let Self { inner, path, rows } = *self;
        let sink = inner
            .into_inner()
            .map_err(|e| Error::from_parquet(path, e))?;
        sink.close()?;
        Ok(rows)
    }
}

const fn is_signed_int(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
    )
}

/// Row-group statistics for a top-level column, in the scalar domain the
/// expression interpreter compares against.
fn column_statistics(rg: &RowGroupMetaData, schema: &Schema, name: &str) -> Option<ColumnStatistics> {
    let field = schema.field_with_name(name).ok()?;
    let chunk = rg
        .columns()
        .iter()
        .find(|c| c.column_path().string() == name)?;
    let stats = chunk.statistics()?;
    let dt = field.data_type();

    let (min, max) = match stats {
        Statistics::Int32(s) if is_signed_int(dt) => (
            s.min_opt().map(|v| ScalarValue::Int64(i64::from(*v))),
            s.max_opt().map(|v| ScalarValue::Int64(i64::from(*v))),
        ),
        Statistics::Int64(s) if is_signed_int(dt) => (
            s.min_opt().map(|v| ScalarValue::Int64(*v)),
            s.max_opt().map(|v| ScalarValue::Int64(*v)),
        ),
        // Float bounds leave NaN out while row comparisons order NaN at the
        // ends, so only null counts are usable for them.
        Statistics::Float(_) | Statistics::Double(_) => (None, None),
        Statistics::ByteArray(s)
            if matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View) =>
        {
            (
                s.min_opt()
                    .and_then(|v| v.as_utf8().ok())
                    .map(|v| ScalarValue::Utf8(v.to_string())),
                s.max_opt()
                    .and_then(|v| v.as_utf8().ok())
                    .map(|v| ScalarValue::Utf8(v.to_string())),
            )
        }
        Statistics::Boolean(s) if *dt == DataType::Boolean => (
            s.min_opt().map(|v| ScalarValue::Boolean(*v)),
            s.max_opt().map(|v| ScalarValue::Boolean(*v)),
        ),
        _ => (None, None),
    };

    Some(ColumnStatistics {
        min,
        max,
        null_count: stats.null_count_opt(),
        row_count: u64::try_from(rg.num_rows()).unwrap_or(0),
    })
}

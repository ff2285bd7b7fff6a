//! File format plugins.
//!
//! A [`FileFormat`] adapts one physical encoding to the four capabilities the
//! dataset layer needs: a cheap support check, schema inspection, a projected
//! (and optionally filtered) scan, and writing. Formats are used through
//! `Arc<dyn FileFormat>` handles; format-specific write parameters travel in the
//! capability-typed [`FileWriteOptions`] enum.
//!
//! | Format | Inspect reads | Filter pushdown |
//! |---|---|---|
//! | [`ParquetFileFormat`] | footer | row-group statistics |
//! | [`IpcFileFormat`] | footer | none |
//! | [`CsvFileFormat`] | sample of rows | none |
//! | [`JsonFileFormat`] | sample of rows | none |
//!
//! Pushdown only ever skips data; the scanner always re-applies the filter.

mod csv;
mod ipc;
mod json;
mod parquet;

pub use self::csv::{CsvFileFormat, CsvWriteOptions};
pub use self::ipc::{IpcFileFormat, IpcWriteOptions};
pub use self::json::{JsonFileFormat, JsonWriteOptions};
pub use self::parquet::{ParquetCompression, ParquetFileFormat, ParquetWriteOptions};

use crate::compression::auto_detect_reader;
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::fs::{FileSystem, InputFile, OutputStream};
use crate::metrics::MetricsCollector;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tracing::warn;

/// Boxed stream of decoded batches.
pub type RecordBatchIter = Box<dyn Iterator<Item = Result<RecordBatch>> + Send>;

/// Default rows per decoded batch.
pub const DEFAULT_BATCH_SIZE: usize = 64 * 1024;

/// One file on one filesystem.
#[derive(Clone)]
pub struct FileSource {
    fs: Arc<dyn FileSystem>,
    path: String,
    size: Option<u64>,
}

impl FileSource {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
            size: None,
        }
    }

    #[must_use]
    pub const fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        self.size
    }

    #[must_use]
    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Open a fresh random-access handle.
    ///
    /// # Errors
    /// `NotFound` or `Io` from the filesystem.
    pub fn open(&self) -> Result<InputFile> {
        self.fs.open_input_file(&self.path)
    }

    /// Open a sequential reader, transparently decompressing by extension or magic bytes.
    ///
    /// # Errors
    /// `NotFound`/`Io` from the filesystem, `Format` if the codec fails to start.
    pub fn open_decoded(&self) -> Result<Box<dyn Read + Send>> {
        let file = self.open()?;
        auto_detect_reader(Box::new(file), &self.path)
    }

    /// Whether the file starts with `magic`.
    pub(crate) fn starts_with(&self, magic: &[u8]) -> Result<bool> {
        let file = self.open()?;
        if file.size() < magic.len() as u64 {
            return Ok(false);
        }
        Ok(file.read_at(0, magic.len())?.as_ref() == magic)
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("fs", &self.fs.type_name())
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

/// What a fragment scan should produce.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Columns to decode; `None` reads every column. Names absent from the
    /// file are ignored.
    pub columns: Option<Vec<String>>,
    /// Predicate available for pushdown.
    pub filter: Expression,
    pub batch_size: usize,
    /// Schema already inspected for this file, reused by formats that would
    /// otherwise infer it again.
    pub physical_schema: Option<SchemaRef>,
    pub metrics: MetricsCollector,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            columns: None,
            filter: Expression::literal(true),
            batch_size: DEFAULT_BATCH_SIZE,
            physical_schema: None,
            metrics: MetricsCollector::new(),
        }
    }
}

impl ScanRequest {
    /// Indices into `schema` of the requested columns present in the file.
    pub(crate) fn projection(&self, schema: &arrow::datatypes::Schema) -> Option<Vec<usize>> {
        self.columns.as_ref().map(|cols| {
            schema
                .fields()
                .iter()
                .enumerate()
                .filter(|(_, f)| cols.iter().any(|c| c == f.name()))
                .map(|(i, _)| i)
                .collect()
        })
    }
}

/// Format-specific write parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum FileWriteOptions {
    Parquet(ParquetWriteOptions),
    Ipc(IpcWriteOptions),
    Csv(CsvWriteOptions),
    Json(JsonWriteOptions),
}

impl FileWriteOptions {
    #[must_use]
    pub const fn format_name(&self) -> &'static str {
        match self {
            Self::Parquet(_) => "parquet",
            Self::Ipc(_) => "ipc",
            Self::Csv(_) => "csv",
            Self::Json(_) => "json",
        }
    }

    pub(crate) fn mismatch(&self, expected: &str) -> Error {
        Error::invalid(format!(
            "{} write options passed to the {expected} format",
            self.format_name()
        ))
    }
}

/// Encodes batches into one output file.
pub trait FileWriter: Send {
    /// Append a batch; its schema must match the writer's.
    ///
    /// # Errors
    /// `Format` on encoding failures, `Io` on write failures.
    fn write(&mut self, batch: &RecordBatch) -> Result<()>;

    /// Finalise the encoding and close the underlying stream.
    ///
    /// # Errors
    /// `Format` or `Io` if the trailer or the close fails.
    fn finish(self: Box<Self>) -> Result<u64>;
}

/// A physical file encoding.
pub trait FileFormat: Send + Sync + fmt::Debug {
    /// Short name, e.g. `"parquet"`.
    fn type_name(&self) -> &'static str;

    /// Extension used for new files, without the dot.
    fn default_extension(&self) -> &'static str;

    /// Cheap check whether `source` looks like this format.
    ///
    /// # Errors
    /// `Io` if the file cannot be probed.
    fn is_supported(&self, source: &FileSource) -> Result<bool>;

    /// Physical schema of `source`.
    ///
    /// # Errors
    /// `Format` on corrupt or unreadable metadata.
    fn inspect(&self, source: &FileSource) -> Result<SchemaRef>;

    /// Decode the requested columns.
    ///
    /// # Errors
    /// `Format` on corrupt input, `Io` on read failures.
    fn scan(&self, source: &FileSource, request: &ScanRequest) -> Result<RecordBatchIter>;

    fn default_write_options(&self) -> FileWriteOptions;

    /// Start encoding `schema` into `sink`.
    ///
    /// # Errors
    /// `Invalid` if `options` belong to another format.
    fn make_writer(
        &self,
        sink: Box<dyn OutputStream>,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>>;

    /// Encode a whole batch stream into `sink`.
    ///
    /// The writer is finished even when a batch fails, so the stream is never
    /// left open; the first error is returned.
    ///
    /// # Errors
    /// The first error from the batch stream or the writer.
    fn write_fragment(
        &self,
        batches: &mut dyn Iterator<Item = Result<RecordBatch>>,
        schema: SchemaRef,
        sink: Box<dyn OutputStream>,
        options: &FileWriteOptions,
    ) -> Result<u64> {
        let path = sink.path().to_string();
        let mut writer = self.make_writer(sink, schema, options)?;
        let mut written = Ok(());
        for batch in batches {
            if let Err(e) = batch.and_then(|b| writer.write(&b)) {
                written = Err(e);
                break;
            }
        }
        let finished = writer.finish();
        match (written, finished) {
            (Ok(()), finished) => finished,
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(path = %path, error = %close_err, "closing partially written file failed");
                Err(e)
            }
        }
    }
}

/// Split oversized batches so none exceeds `batch_size` rows.
pub(crate) fn rebatch(inner: RecordBatchIter, batch_size: usize) -> RecordBatchIter {
    let batch_size = batch_size.max(1);
    Box::new(inner.flat_map(move |item| -> Vec<Result<RecordBatch>> {
        match item {
            Ok(batch) if batch.num_rows() > batch_size => (0..batch.num_rows())
                .step_by(batch_size)
                .map(|offset| Ok(batch.slice(offset, batch_size.min(batch.num_rows() - offset))))
                .collect(),
            other => vec![other],
        }
    }))
}

/// Whether `path`, minus any compression suffix, ends in one of `extensions`.
pub(crate) fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let stripped = crate::compression::strip_codec_extension(path).to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| stripped.ends_with(&format!(".{ext}")))
}

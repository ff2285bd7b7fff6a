//! Delimited text plugin.
//!
//! Schemas are inferred from a sample of leading rows, so every scan either
//! reuses the schema found at discovery or samples again. Files ending in a
//! compression suffix (`.csv.gz`, `.tsv.zst`, ...) are decoded transparently.

use super::{
    FileFormat, FileSource, FileWriteOptions, FileWriter, RecordBatchIter, ScanRequest,
    has_extension,
};
use crate::compression::auto_detect_writer;
use crate::error::{Error, Result};
use crate::fs::OutputStream;
use arrow::csv::reader::{Format, ReaderBuilder};
use arrow::csv::writer::{Writer, WriterBuilder};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Encoding parameters for new CSV files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvWriteOptions {
    pub has_header: bool,
    pub delimiter: u8,
}

impl Default for CsvWriteOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
        }
    }
}

/// Comma (or otherwise) separated values.
#[derive(Debug, Clone)]
pub struct CsvFileFormat {
    has_header: bool,
    delimiter: u8,
    infer_rows: usize,
}

impl Default for CsvFileFormat {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            infer_rows: 1000,
        }
    }
}

impl CsvFileFormat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Rows sampled when inferring column types.
    #[must_use]
    pub const fn with_infer_rows(mut self, rows: usize) -> Self {
        self.infer_rows = rows;
        self
    }

    fn dialect(&self) -> Format {
        Format::default()
            .with_header(self.has_header)
            .with_delimiter(self.delimiter)
    }
}

impl FileFormat for CsvFileFormat {
    fn type_name(&self) -> &'static str {
        "csv"
    }

    fn default_extension(&self) -> &'static str {
        "csv"
    }

    fn is_supported(&self, source: &FileSource) -> Result<bool> {
        Ok(has_extension(source.path(), &["csv", "tsv"]))
    }

    fn inspect(&self, source: &FileSource) -> Result<SchemaRef> {
        let reader = source.open_decoded()?;
        let (schema, _) = self
            .dialect()
            .infer_schema(reader, Some(self.infer_rows.max(1)))
            .map_err(|e| Error::from_arrow(source.path(), e))?;
        Ok(Arc::new(schema))
    }

    fn scan(&self, source: &FileSource, request: &ScanRequest) -> Result<RecordBatchIter> {
        let path = source.path().to_string();
        let schema = match &request.physical_schema {
            Some(schema) => schema.clone(),
            None => self.inspect(source)?,
        };
        let mut builder = ReaderBuilder::new(Arc::clone(&schema))
            .with_format(self.dialect())
            .with_batch_size(request.batch_size.max(1));
        if let Some(indices) = request.projection(&schema) {
            builder = builder.with_projection(indices);
        }
        let reader = builder
            .build(source.open_decoded()?)
            .map_err(|e| Error::from_arrow(path.clone(), e))?;
        Ok(Box::new(
            reader.map(move |b| b.map_err(|e| Error::from_arrow(path.clone(), e))),
        ))
    }

    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::Csv(CsvWriteOptions {
            has_header: self.has_header,
            delimiter: self.delimiter,
        })
    }

    fn make_writer(
        &self,
        sink: Box<dyn OutputStream>,
        _schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>> {
        let FileWriteOptions::Csv(opts) = options else {
            return Err(options.mismatch(self.type_name()));
        };
        let path = sink.path().to_string();
        let inner = WriterBuilder::new()
            .with_header(opts.has_header)
            .with_delimiter(opts.delimiter)
            .build(auto_detect_writer(sink)?);
        Ok(Box::new(CsvWriter {
            inner,
            path,
            rows: 0,
        }))
    }
}

struct CsvWriter {
    inner: Writer<Box<dyn OutputStream>>,
    path: String,
    rows: u64,
}

impl FileWriter for CsvWriter {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.inner
            .write(batch)
            .map_err(|e| Error::from_arrow(self.path.clone(), e))?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let Self { inner, rows, .. } = *self;
        inner.into_inner().close()?;
        Ok(rows)
    }
}

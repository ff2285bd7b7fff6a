//! Newline-delimited JSON plugin.

use super::{
    FileFormat, FileSource, FileWriteOptions, FileWriter, RecordBatchIter, ScanRequest,
    has_extension,
};
use crate::compression::auto_detect_writer;
use crate::error::{Error, Result};
use crate::fs::OutputStream;
use arrow::datatypes::SchemaRef;
use arrow::json::reader::{ReaderBuilder, infer_json_schema};
use arrow::json::writer::{LineDelimited, Writer, WriterBuilder};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::io::BufReader;
use std::sync::Arc;

/// Encoding parameters for new JSON files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonWriteOptions {
    /// Write `"key": null` instead of omitting null members.
    pub explicit_nulls: bool,
}

/// One JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonFileFormat {
    infer_rows: usize,
}

impl Default for JsonFileFormat {
    fn default() -> Self {
        Self { infer_rows: 1000 }
    }
}

impl JsonFileFormat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_infer_rows(mut self, rows: usize) -> Self {
        self.infer_rows = rows;
        self
    }
}

impl FileFormat for JsonFileFormat {
    fn type_name(&self) -> &'static str {
        "json"
    }

    fn default_extension(&self) -> &'static str {
        "jsonl"
    }

    fn is_supported(&self, source: &FileSource) -> Result<bool> {
        Ok(has_extension(source.path(), &["json", "jsonl", "ndjson"]))
    }

    fn inspect(&self, source: &FileSource) -> Result<SchemaRef> {
        let reader = BufReader::new(source.open_decoded()?);
        let (schema, _) = infer_json_schema(reader, Some(self.infer_rows.max(1)))
            .map_err(|e| Error::from_arrow(source.path(), e))?;
        Ok(Arc::new(schema))
    }

    fn scan(&self, source: &FileSource, request: &ScanRequest) -> Result<RecordBatchIter> {
        let path = source.path().to_string();
        let schema = match &request.physical_schema {
            Some(schema) => schema.clone(),
            None => self.inspect(source)?,
        };
        // Members outside the decode schema are skipped by the reader.
        let decode_schema = match request.projection(&schema) {
            Some(indices) => Arc::new(
                schema
                    .project(&indices)
                    .map_err(|e| Error::from_arrow(path.clone(), e))?,
            ),
            None => schema,
        };
        let reader = ReaderBuilder::new(decode_schema)
            .with_batch_size(request.batch_size.max(1))
            .build(BufReader::new(source.open_decoded()?))
            .map_err(|e| Error::from_arrow(path.clone(), e))?;
        Ok(Box::new(
            reader.map(move |b| b.map_err(|e| Error::from_arrow(path.clone(), e))),
        ))
    }

    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::Json(JsonWriteOptions::default())
    }

    fn make_writer(
        &self,
        sink: Box<dyn OutputStream>,
        _schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>> {
        let FileWriteOptions::Json(opts) = options else {
            return Err(options.mismatch(self.type_name()));
        };
        let path = sink.path().to_string();
        let inner = WriterBuilder::new()
            .with_explicit_nulls(opts.explicit_nulls)
            .build::<_, LineDelimited>(auto_detect_writer(sink)?);
        Ok(Box::new(JsonWriter {
            inner,
            path,
            rows: 0,
        }))
    }
}

struct JsonWriter {
    inner: Writer<Box<dyn OutputStream>, LineDelimited>,
    path: String,
    rows: u64,
}

impl FileWriter for JsonWriter {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.inner
            .write(batch)
            .map_err(|e| Error::from_arrow(self.path.clone(), e))?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let Self {
            mut inner,
            path,
            rows,
        } = *self;
        inner.finish().map_err(|e| Error::from_arrow(path, e))?;
        inner.into_inner().close()?;
        Ok(rows)
    }
}

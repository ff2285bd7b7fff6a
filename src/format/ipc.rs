//! Arrow IPC file plugin (the random-access "Feather v2" layout).

use super::{
    FileFormat, FileSource, FileWriteOptions, FileWriter, RecordBatchIter, ScanRequest, rebatch,
};
use crate::error::{Error, Result};
use crate::fs::OutputStream;
use arrow::datatypes::SchemaRef;
use arrow::ipc::MetadataVersion;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::{FileWriter as IpcStreamWriter, IpcWriteOptions as ArrowIpcOptions};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

const MAGIC: &[u8] = b"ARROW1";

/// Encoding parameters for new IPC files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcWriteOptions {
    /// Buffer alignment in bytes; must be a multiple of 8.
    pub alignment: usize,
}

impl Default for IpcWriteOptions {
    fn default() -> Self {
        Self { alignment: 64 }
    }
}

/// Arrow IPC files.
#[derive(Debug, Clone, Default)]
pub struct IpcFileFormat;

impl FileFormat for IpcFileFormat {
    fn type_name(&self) -> &'static str {
        "ipc"
    }

    fn default_extension(&self) -> &'static str {
        "arrow"
    }

    fn is_supported(&self, source: &FileSource) -> Result<bool> {
        source.starts_with(MAGIC)
    }

    fn inspect(&self, source: &FileSource) -> Result<SchemaRef> {
        let reader = FileReader::try_new(source.open()?, None)
            .map_err(|e| Error::from_arrow(source.path(), e))?;
        Ok(reader.schema())
    }

    fn scan(&self, source: &FileSource, request: &ScanRequest) -> Result<RecordBatchIter> {
        let path = source.path().to_string();
        let schema = match &request.physical_schema {
            Some(schema) => schema.clone(),
            None => self.inspect(source)?,
        };
        let projection = request.projection(&schema);
        let reader = FileReader::try_new(source.open()?, projection)
            .map_err(|e| Error::from_arrow(path.clone(), e))?;
        let batches: RecordBatchIter =
            Box::new(reader.map(move |b| b.map_err(|e| Error::from_arrow(path.clone(), e))));
        Ok(rebatch(batches, request.batch_size))
    }

    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::Ipc(IpcWriteOptions::default())
    }

    fn make_writer(
        &self,
        sink: Box<dyn OutputStream>,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>> {
        let FileWriteOptions::Ipc(opts) = options else {
            return Err(options.mismatch(self.type_name()));
        };
        let path = sink.path().to_string();
        let ipc_options = ArrowIpcOptions::try_new(opts.alignment, false, MetadataVersion::V5)
            .map_err(|e| Error::invalid(format!("ipc write options: {e}")))?;
        let inner = IpcStreamWriter::try_new_with_options(sink, &schema, ipc_options)
            .map_err(|e| Error::from_arrow(path.clone(), e))?;
        Ok(Box::new(IpcWriter {
            inner,
            path,
            rows: 0,
        }))
    }
}

struct IpcWriter {
    inner: IpcStreamWriter<Box<dyn OutputStream>>,
    path: String,
    rows: u64,
}

impl FileWriter for IpcWriter {
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
        inner
            .finish()
            .map_err(|e| Error::from_arrow(path.clone(), e))?;
        let sink = inner
            .into_inner()
            .map_err(|e| Error::from_arrow(path, e))?;
        sink.close()?;
        Ok(rows)
    }
}

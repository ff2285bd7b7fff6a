//! Fragments: the independently scannable pieces of a dataset.

use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::format::{FileFormat, FileSource, RecordBatchIter, ScanRequest, rebatch};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A unit of data that can be scanned on its own.
///
/// Every row of a fragment satisfies its partition expression, which is what
/// lets a scan skip the fragment entirely when the expression contradicts the
/// filter.
pub trait Fragment: Send + Sync + fmt::Debug + fmt::Display {
    /// Constraint known to hold for every row, derived from the fragment's location.
    fn partition_expression(&self) -> &Expression;

    /// Schema as stored, before unification with the dataset schema.
    ///
    /// # Errors
    /// Whatever the underlying format reports when reading metadata.
    fn read_physical_schema(&self) -> Result<SchemaRef>;

    /// Decode the fragment's batches in their physical schema.
    ///
    /// # Errors
    /// `Format`/`Io` errors from the underlying reader.
    fn scan(&self, request: &ScanRequest) -> Result<RecordBatchIter>;
}

/// One file read through a [`FileFormat`].
pub struct FileFragment {
    source: FileSource,
    format: Arc<dyn FileFormat>,
    partition_expression: Expression,
    physical_schema: OnceLock<SchemaRef>,
}

impl FileFragment {
    pub fn new(
        source: FileSource,
        format: Arc<dyn FileFormat>,
        partition_expression: Expression,
    ) -> Self {
        Self {
            source,
            format,
            partition_expression,
            physical_schema: OnceLock::new(),
        }
    }

    /// Seed the schema cache with a schema inspected earlier.
    #[must_use]
    pub fn with_physical_schema(self, schema: SchemaRef) -> Self {
        let _ = self.physical_schema.set(schema);
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.source.path()
    }

    #[must_use]
    pub const fn source(&self) -> &FileSource {
        &self.source
    }

    #[must_use]
    pub fn format(&self) -> &Arc<dyn FileFormat> {
        &self.format
    }
}

impl Fragment for FileFragment {
    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn read_physical_schema(&self) -> Result<SchemaRef> {
        if let Some(schema) = self.physical_schema.get() {
            return Ok(Arc::clone(schema));
        }
        let schema = self.format.inspect(&self.source)?;
        Ok(Arc::clone(self.physical_schema.get_or_init(|| schema)))
    }

    fn scan(&self, request: &ScanRequest) -> Result<RecordBatchIter> {
        let mut request = request.clone();
        if request.physical_schema.is_none() {
            request.physical_schema = Some(self.read_physical_schema()?);
        }
        self.format.scan(&self.source, &request)
    }
}

impl fmt::Debug for FileFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileFragment")
            .field("path", &self.source.path())
            .field("format", &self.format.type_name())
            .field("partition_expression", &self.partition_expression.to_string())
            .finish()
    }
}

impl fmt::Display for FileFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source.path())
    }
}

/// Batches already resident in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFragment {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    partition_expression: Expression,
}

impl InMemoryFragment {
    /// # Errors
    /// [`Error::Schema`] if a batch's schema differs from `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        if let Some(bad) = batches.iter().find(|b| b.schema().fields() != schema.fields()) {
            return Err(Error::schema(format!(
                "batch schema {} does not match fragment schema {schema}",
                bad.schema()
            )));
        }
        Ok(Self {
            schema,
            batches,
            partition_expression: Expression::literal(true),
        })
    }

    #[must_use]
    pub fn with_partition_expression(mut self, expr: Expression) -> Self {
        self.partition_expression = expr;
        self
    }
}

impl Fragment for InMemoryFragment {
    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn read_physical_schema(&self) -> Result<SchemaRef> {
        Ok(Arc::clone(&self.schema))
    }

    fn scan(&self, request: &ScanRequest) -> Result<RecordBatchIter> {
        let projection = request.projection(&self.schema);
        let batches = self
            .batches
            .iter()
            .map(|b| match &projection {
                Some(indices) => b
                    .project(indices)
                    .map_err(|e| Error::from_arrow("in-memory fragment", e)),
                None => Ok(b.clone()),
            })
            .collect::<Vec<_>>();
        Ok(rebatch(Box::new(batches.into_iter()), request.batch_size))
    }
}

impl fmt::Display for InMemoryFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: usize = self.batches.iter().map(RecordBatch::num_rows).sum();
        write!(f, "<in-memory: {rows} rows>")
    }
}

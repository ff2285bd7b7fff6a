//! Datasets: one logical table over many fragments.

use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::format::FileFormat;
use crate::fragment::{FileFragment, Fragment, InMemoryFragment};
use crate::fs::FileSystem;
use crate::metrics::{FRAGMENTS_PRUNED, MetricsCollector};
use crate::partitioning::Partitioning;
use crate::scanner::{ScannerBuilder, Scanner};
use crate::table::Table;
use crate::writer::{FileSystemDatasetWriteOptions, WriteSummary, write_dataset};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lazy sequence of fragments in discovery order.
pub type FragmentIter<'a> = Box<dyn Iterator<Item = Arc<dyn Fragment>> + Send + 'a>;

/// A collection of fragments sharing one unified schema.
pub trait Dataset: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Unified schema every scanned batch is conformed to.
    fn schema(&self) -> &SchemaRef;

    /// Every fragment, in discovery order.
    fn all_fragments(&self) -> FragmentIter<'_>;

    /// Fragments that may hold rows matching `filter`.
    ///
    /// Fragments whose partition expression contradicts the filter are
    /// skipped without touching their files. Each call starts over.
    fn get_fragments(&self, filter: &Expression) -> FragmentIter<'_> {
        prune_fragments(self.all_fragments(), filter.clone(), None)
    }
}

/// Drop fragments the filter rules out, counting them in `metrics`.
pub(crate) fn prune_fragments<'a>(
    fragments: FragmentIter<'a>,
    filter: Expression,
    metrics: Option<MetricsCollector>,
) -> FragmentIter<'a> {
    if filter.is_literal_true() {
        return fragments;
    }
    Box::new(fragments.filter(move |fragment| {
        let keep = filter
            .simplify_with_guarantee(fragment.partition_expression())
            .is_satisfiable();
        if !keep {
            debug!(fragment = %fragment, "pruned by partition expression");
            if let Some(metrics) = &metrics {
                metrics.increment_counter(FRAGMENTS_PRUNED, 1);
            }
        }
        keep
    }))
}

/// Files discovered on a filesystem.
pub struct FileSystemDataset {
    schema: SchemaRef,
    filesystem: Arc<dyn FileSystem>,
    format: Arc<dyn FileFormat>,
    partitioning: Arc<dyn Partitioning>,
    fragments: Vec<Arc<FileFragment>>,
}

impl FileSystemDataset {
    pub fn new(
        schema: SchemaRef,
        filesystem: Arc<dyn FileSystem>,
        format: Arc<dyn FileFormat>,
        partitioning: Arc<dyn Partitioning>,
        fragments: Vec<FileFragment>,
    ) -> Self {
        Self {
            schema,
            filesystem,
            format,
            partitioning,
            fragments: fragments.into_iter().map(Arc::new).collect(),
        }
    }

    /// Paths of every file, in discovery order.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.path().to_string()).collect()
    }

    #[must_use]
    pub fn fragments(&self) -> &[Arc<FileFragment>] {
        &self.fragments
    }

    #[must_use]
    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.filesystem
    }

    #[must_use]
    pub fn format(&self) -> &Arc<dyn FileFormat> {
        &self.format
    }

    #[must_use]
    pub fn partitioning(&self) -> &Arc<dyn Partitioning> {
        &self.partitioning
    }

    /// Start configuring a scan of this dataset.
    #[must_use]
    pub fn new_scan(self: &Arc<Self>) -> ScannerBuilder {
        ScannerBuilder::new(Arc::clone(self) as Arc<dyn Dataset>)
    }

    /// Write everything `scanner` yields as a new file set.
    ///
    /// # Errors
    /// See [`write_dataset`].
    pub fn write(options: &FileSystemDatasetWriteOptions, scanner: &Scanner) -> Result<WriteSummary> {
        write_dataset(options, scanner)
    }
}

impl Dataset for FileSystemDataset {
    fn type_name(&self) -> &'static str {
        "filesystem"
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

impl fmt::Debug for FileSystemDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemDataset")
            .field("filesystem", &self.filesystem.type_name())
            .field("format", &self.format.type_name())
            .field("partitioning", &self.partitioning.type_name())
            .field("files", &self.fragments.len())
            .finish()
    }
}

/// Record batches held in memory, one fragment per batch.
#[derive(Debug)]
pub struct InMemoryDataset {
    schema: SchemaRef,
    fragments: Vec<Arc<InMemoryFragment>>,
}

impl InMemoryDataset {
    /// # Errors
    /// [`Error::Schema`] if a batch's schema differs from `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let fragments = batches
            .into_iter()
            .map(|b| InMemoryFragment::new(Arc::clone(&schema), vec![b]).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { schema, fragments })
    }

    #[must_use]
    pub fn from_table(table: Table) -> Self {
        let schema = Arc::clone(table.schema());
        let fragments = table
            .into_batches()
            .into_iter()
            .filter_map(|b| InMemoryFragment::new(Arc::clone(&schema), vec![b]).ok())
            .map(Arc::new)
            .collect();
        Self { schema, fragments }
    }

    #[must_use]
    pub fn new_scan(self: &Arc<Self>) -> ScannerBuilder {
        ScannerBuilder::new(Arc::clone(self) as Arc<dyn Dataset>)
    }
}

impl Dataset for InMemoryDataset {
    fn type_name(&self) -> &'static str {
        "in-memory"
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

impl TryFrom<Vec<RecordBatch>> for InMemoryDataset {
    type Error = Error;

    fn try_from(batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| Error::invalid("cannot derive a schema from zero batches"))?;
        Self::new(schema, batches)
    }
}

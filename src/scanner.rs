//! Scans: projection, filtering and materialisation over a [`Dataset`].
//!
//! A [`ScannerBuilder`] collects the scan options and validates them against
//! the dataset schema; the resulting [`Scanner`] can be consumed lazily with
//! [`to_batches`](Scanner::to_batches) or materialised with
//! [`to_table`](Scanner::to_table).
//!
//! Every physical batch goes through the same steps:
//!
//! 1. the filter is simplified with the fragment's partition expression,
//! 2. the batch is conformed to the dataset schema (promoted columns cast,
//!    missing columns null-filled, partition keys materialised),
//! 3. the simplified filter is evaluated and applied,
//! 4. the projection is taken.

use crate::config::EngineConfig;
use crate::dataset::{Dataset, prune_fragments};
use crate::error::{Error, Result};
use crate::executor::{ExecMode, Executor};
use crate::expression::Expression;
use crate::format::{DEFAULT_BATCH_SIZE, RecordBatchIter, ScanRequest};
use crate::fragment::Fragment;
use crate::metrics::{BATCHES_READ, FRAGMENTS_SCANNED, MetricsCollector, ROWS_READ};
use crate::schema::{conform_batch, project_schema};
use crate::table::Table;
use arrow::compute::filter_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Cooperative cancellation flag shared between a caller and running scans.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled("scan cancelled".into()));
        }
        Ok(())
    }
}

/// Settings of one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Output columns in order; `None` keeps every dataset column.
    pub columns: Option<Vec<String>>,
    /// Row predicate.
    pub filter: Expression,
    pub batch_size: usize,
    pub exec_mode: ExecMode,
    /// Upper bound in bytes for [`Scanner::to_table`].
    pub memory_limit: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            columns: None,
            filter: Expression::literal(true),
            batch_size: DEFAULT_BATCH_SIZE,
            exec_mode: ExecMode::default(),
            memory_limit: None,
        }
    }
}

/// Configures a [`Scanner`].
pub struct ScannerBuilder {
    dataset: Arc<dyn Dataset>,
    options: ScanOptions,
    token: CancellationToken,
}

impl ScannerBuilder {
    pub fn new(dataset: Arc<dyn Dataset>) -> Self {
        Self {
            dataset,
            options: ScanOptions::default(),
            token: CancellationToken::default(),
        }
    }

    /// Keep only `columns`, in this order.
    #[must_use]
    pub fn project<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.options.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Keep only rows for which `filter` is true.
    #[must_use]
    pub fn filter(mut self, filter: Expression) -> Self {
        self.options.filter = filter;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.options.batch_size = rows;
        self
    }

    /// Parallel (default pool size) or inline fragment work.
    #[must_use]
    pub fn use_threads(mut self, use_threads: bool) -> Self {
        self.options.exec_mode = if use_threads {
            ExecMode::default()
        } else {
            ExecMode::Sequential
        };
        self
    }

    #[must_use]
    pub fn exec_mode(mut self, mode: ExecMode) -> Self {
        self.options.exec_mode = mode;
        self
    }

    #[must_use]
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.options.memory_limit = Some(bytes);
        self
    }

    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Take batch size, threading and memory limit from `config`.
    #[must_use]
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.options.batch_size = config.batch_size;
        self.options.exec_mode = config.exec_mode();
        self.options.memory_limit = config.memory_limit;
        self
    }

    /// Validate the options and build the scanner.
    ///
    /// # Errors
    /// [`Error::Invalid`] for unknown or repeated projection columns, filters
    /// naming unknown columns, a zero batch size or a zero thread count.
    pub fn finish(self) -> Result<Scanner> {
        let schema = Arc::clone(self.dataset.schema());
        if self.options.batch_size == 0 {
            return Err(Error::invalid("batch size must be at least 1"));
        }
        let projected_schema = match &self.options.columns {
            Some(columns) => {
                let mut seen = HashSet::new();
                if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
                    return Err(Error::invalid(format!("column '{dup}' projected twice")));
                }
                project_schema(&schema, columns)?
            }
            None => Arc::clone(&schema),
        };
        self.options.filter.validate(&schema)?;
        let executor = Executor::new(self.options.exec_mode)?;
        Ok(Scanner {
            dataset: self.dataset,
            options: self.options,
            projected_schema,
            executor,
            token: self.token,
            metrics: MetricsCollector::new(),
        })
    }
}

/// A validated, reusable scan over a dataset.
pub struct Scanner {
    dataset: Arc<dyn Dataset>,
    options: ScanOptions,
    projected_schema: SchemaRef,
    executor: Executor,
    token: CancellationToken,
    metrics: MetricsCollector,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("dataset", &self.dataset.type_name())
            .field("options", &self.options)
            .field("threads", &self.executor.threads())
            .finish()
    }
}

impl Scanner {
    /// Schema of every batch the scan yields.
    #[must_use]
    pub const fn projected_schema(&self) -> &SchemaRef {
        &self.projected_schema
    }

    #[must_use]
    pub const fn options(&self) -> &ScanOptions {
        &self.options
    }

    #[must_use]
    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    /// Counters accumulated by every run of this scanner.
    #[must_use]
    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn plan(&self, output: SchemaRef) -> Arc<ScanPlan> {
        let dataset_schema = self.dataset.schema();
        let mut wanted: HashSet<&str> = output.fields().iter().map(|f| f.name().as_str()).collect();
        wanted.extend(self.options.filter.fields_referenced());
        let read_schema = Arc::new(arrow::datatypes::Schema::new(
            dataset_schema
                .fields()
                .iter()
                .filter(|f| wanted.contains(f.name().as_str()))
                .cloned()
                .collect::<Vec<_>>(),
        ));
        let output_indices = output
            .fields()
            .iter()
            .filter_map(|f| read_schema.index_of(f.name()).ok())
            .collect();
        let columns = if read_schema.fields().is_empty() {
            None
        } else {
            Some(read_schema.fields().iter().map(|f| f.name().clone()).collect())
        };
        Arc::new(ScanPlan {
            filter: self.options.filter.clone(),
            columns,
            read_schema,
            output_schema: output,
            output_indices,
            batch_size: self.options.batch_size,
            token: self.token.clone(),
            metrics: self.metrics.clone(),
        })
    }

    fn fragments(&self) -> Vec<Arc<dyn Fragment>> {
        prune_fragments(
            self.dataset.all_fragments(),
            self.options.filter.clone(),
            Some(self.metrics.clone()),
        )
        .collect()
    }

    /// Lazily yield projected, filtered batches in fragment order.
    ///
    /// Fragments are opened one at a time on the calling thread.
    #[must_use]
    pub fn to_batches(&self) -> RecordBatchStream {
        self.stream_with(Arc::clone(&self.projected_schema))
    }

    fn stream_with(&self, output: SchemaRef) -> RecordBatchStream {
        let plan = self.plan(Arc::clone(&output));
        let dataset_fragments: Vec<Arc<dyn Fragment>> = self.dataset.all_fragments().collect();
        let fragments = prune_fragments(
            Box::new(dataset_fragments.into_iter()),
            self.options.filter.clone(),
            Some(self.metrics.clone()),
        );
        let batches = fragments.flat_map(move |fragment| -> RecordBatchIter {
            match plan.scan_fragment(fragment.as_ref()) {
                Ok(batches) => batches,
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        });
        RecordBatchStream {
            schema: output,
            inner: Box::new(batches),
            done: false,
        }
    }

    /// Scan every fragment on the worker pool and collect the result.
    ///
    /// Batches appear in fragment discovery order regardless of which
    /// fragment finishes first.
    ///
    /// # Errors
    /// The first scan error by fragment index, [`Error::Resource`] if the
    /// collected batches exceed the memory limit, or [`Error::Cancelled`].
    pub fn to_table(&self) -> Result<Table> {
        self.metrics.record_start();
        let plan = self.plan(Arc::clone(&self.projected_schema));
        let fragments = self.fragments();
        let fragment_count = fragments.len();
        let used = AtomicUsize::new(0);
        let limit = self.options.memory_limit;
        let gathered = self.executor.scatter_gather(fragments, |_, fragment| {
            let mut out = Vec::new();
            for batch in plan.scan_fragment(fragment.as_ref())? {
                let batch = batch?;
                let size = batch.get_array_memory_size();
                let total = used.fetch_add(size, Ordering::AcqRel) + size;
                if let Some(limit) = limit.filter(|&l| total > l) {
                    return Err(Error::Resource(format!(
                        "scan result needs more than {limit} bytes (reached {total})"
                    )));
                }
                out.push(batch);
            }
            Ok(out)
        });
        self.metrics.record_end();
        let per_fragment = gathered?;
        let table = Table::try_new(
            Arc::clone(&self.projected_schema),
            per_fragment.into_iter().flatten().collect(),
        )?;
        info!(
            fragments = fragment_count,
            rows = table.num_rows(),
            bytes = used.load(Ordering::Acquire),
            "materialised scan"
        );
        Ok(table)
    }

    /// Number of rows passing the filter.
    ///
    /// # Errors
    /// Any scan error.
    pub fn count_rows(&self) -> Result<u64> {
        let empty = Arc::new(arrow::datatypes::Schema::empty());
        let mut rows = 0u64;
        for batch in self.stream_with(empty) {
            rows += batch?.num_rows() as u64;
        }
        Ok(rows)
    }

    /// The first `n` matching rows, reading only as many fragments as needed.
    ///
    /// # Errors
    /// Any scan error.
    pub fn head(&self, n: usize) -> Result<Table> {
        let mut remaining = n;
        let mut batches = Vec::new();
        let mut stream = self.to_batches();
        while remaining > 0 {
            let Some(batch) = stream.next().transpose()? else {
                break;
            };
            let take = remaining.min(batch.num_rows());
            batches.push(batch.slice(0, take));
            remaining -= take;
        }
        Table::try_new(Arc::clone(&self.projected_schema), batches)
    }
}

/// Everything a worker needs to turn one fragment into output batches.
struct ScanPlan {
    filter: Expression,
    /// Columns requested from the format; `None` reads all of them.
    columns: Option<Vec<String>>,
    /// Dataset columns the projection and filter need.
    read_schema: SchemaRef,
    output_schema: SchemaRef,
    output_indices: Vec<usize>,
    batch_size: usize,
    token: CancellationToken,
    metrics: MetricsCollector,
}

impl ScanPlan {
    fn scan_fragment(self: &Arc<Self>, fragment: &dyn Fragment) -> Result<RecordBatchIter> {
        self.token.check()?;
        let guarantee = fragment.partition_expression();
        let filter = self.filter.simplify_with_guarantee(guarantee);
        let constants = guarantee.known_values();
        let request = ScanRequest {
            columns: self.columns.clone(),
            filter: filter.clone(),
            batch_size: self.batch_size,
            physical_schema: None,
            metrics: self.metrics.clone(),
        };
        let physical = fragment.scan(&request)?;
        self.metrics.increment_counter(FRAGMENTS_SCANNED, 1);
        debug!(fragment = %fragment, filter = %filter, "scanning fragment");

        let plan = Arc::clone(self);
        Ok(Box::new(physical.filter_map(move |batch| {
            let processed = plan
                .token
                .check()
                .and(batch)
                .and_then(|b| plan.process(&b, &filter, &constants));
            match processed {
                Ok(Some(b)) => Some(Ok(b)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        })))
    }

    /// Conform, filter and project one physical batch. Batches the filter
    /// empties are dropped.
    fn process(
        &self,
        batch: &RecordBatch,
        filter: &Expression,
        constants: &std::collections::HashMap<String, crate::expression::ScalarValue>,
    ) -> Result<Option<RecordBatch>> {
        self.metrics.increment_counter(BATCHES_READ, 1);
        self.metrics.increment_counter(ROWS_READ, batch.num_rows() as u64);
        let conformed = conform_batch(batch, &self.read_schema, constants)?;
        let selected = if filter.is_literal_true() {
            conformed
        } else {
            let mask = filter.evaluate(&conformed)?;
            let kept = filter_record_batch(&conformed, &mask)
                .map_err(|e| Error::from_arrow("filter", e))?;
            if kept.num_rows() == 0 {
                return Ok(None);
            }
            kept
        };
        let projected = selected
            .project(&self.output_indices)
            .map_err(|e| Error::from_arrow("projection", e))?;
        let options = arrow::array::RecordBatchOptions::new().with_row_count(Some(projected.num_rows()));
        RecordBatch::try_new_with_options(
            Arc::clone(&self.output_schema),
            projected.columns().to_vec(),
            &options,
        )
        .map(Some)
        .map_err(|e| Error::from_arrow("projection", e))
    }
}

/// Lazy stream of scan output; stops after the first error.
pub struct RecordBatchStream {
    schema: SchemaRef,
    inner: Box<dyn Iterator<Item = Result<RecordBatch>> + Send>,
    done: bool,
}

impl RecordBatchStream {
    #[must_use]
    pub const fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

impl Iterator for RecordBatchStream {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.next();
        if matches!(item, Some(Err(_)) | None) {
            self.done = true;
        }
        item
    }
}

impl fmt::Debug for RecordBatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordBatchStream")
            .field("schema", &self.schema)
            .field("done", &self.done)
            .finish()
    }
}

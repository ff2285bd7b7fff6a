//! Partitioned dataset writer.
//!
//! Rows are routed by their partition key tuple to one directory each
//! (`{base_dir}/{partitioning.format(keys)}`); every directory path is owned
//! by a single [`DirectoryWriter`] that names its files from the basename template
//! and rolls over to a new file when `max_rows_per_file` is reached. Distinct
//! directories are written concurrently.

use crate::error::{Error, Result};
use crate::executor::{ExecMode, Executor};
use crate::expression::{Expression, ScalarValue, conjunction};
use crate::format::{FileFormat, FileWriteOptions, FileWriter};
use crate::fs::{FileSelector, FileSystem, path};
use crate::metrics::{FILES_WRITTEN, ROWS_WRITTEN};
use crate::partitioning::{NoPartitioning, Partitioning, key_equals};
use crate::scanner::Scanner;
use arrow::array::UInt32Array;
use arrow::compute::{cast, take_record_batch};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do when the target already holds files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingDataBehavior {
    /// Fail before writing anything if `base_dir` contains any file.
    #[default]
    Error,
    /// Replace files whose names collide and keep everything else.
    OverwriteOrIgnore,
    /// Empty each partition directory the first time it is written to.
    DeleteMatching,
}

impl FromStr for ExistingDataBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "error" => Ok(Self::Error),
            "overwrite_or_ignore" => Ok(Self::OverwriteOrIgnore),
            "delete_matching" => Ok(Self::DeleteMatching),
            other => Err(Error::invalid(format!("unknown existing data behavior '{other}'"))),
        }
    }
}

/// Everything one write needs.
#[derive(Debug, Clone)]
pub struct FileSystemDatasetWriteOptions {
    pub filesystem: Arc<dyn FileSystem>,
    pub base_dir: String,
    /// Key schema and directory rule. Key columns are not stored in the files.
    pub partitioning: Arc<dyn Partitioning>,
    pub format: Arc<dyn FileFormat>,
    pub file_write_options: FileWriteOptions,
    /// File name pattern; `{i}` is replaced by a per-directory counter.
    pub basename_template: String,
    pub existing_data_behavior: ExistingDataBehavior,
    /// Roll over to a new file after this many rows; 0 means unlimited.
    pub max_rows_per_file: usize,
    /// Upper bound on distinct partition directories.
    pub max_partitions: usize,
    pub exec_mode: ExecMode,
}

impl FileSystemDatasetWriteOptions {
    /// Unpartitioned defaults for `format` under `base_dir`.
    pub fn new(
        filesystem: Arc<dyn FileSystem>,
        base_dir: impl Into<String>,
        format: Arc<dyn FileFormat>,
    ) -> Self {
        Self {
            filesystem,
            base_dir: path::normalize(&base_dir.into()),
            partitioning: Arc::new(NoPartitioning::default()),
            file_write_options: format.default_write_options(),
            basename_template: format!("part-{{i}}.{}", format.default_extension()),
            format,
            existing_data_behavior: ExistingDataBehavior::default(),
            max_rows_per_file: 0,
            max_partitions: 1024,
            exec_mode: ExecMode::default(),
        }
    }

    /// # Errors
    /// [`Error::Invalid`] for a template without exactly one `{i}` or with a
    /// separator, write options of another format, or a zero partition limit.
    pub fn validate(&self) -> Result<()> {
        if self.basename_template.matches("{i}").count() != 1 {
            return Err(Error::invalid(format!(
                "basename template '{}' must contain {{i}} exactly once",
                self.basename_template
            )));
        }
        if self.basename_template.contains('/') {
            return Err(Error::invalid(format!(
                "basename template '{}' must not contain a path separator",
                self.basename_template
            )));
        }
        if self.file_write_options.format_name() != self.format.type_name() {
            return Err(self.file_write_options.mismatch(self.format.type_name()));
        }
        if self.max_partitions == 0 {
            return Err(Error::invalid("max_partitions must be at least 1"));
        }
        Ok(())
    }

    fn basename(&self, counter: usize) -> String {
        self.basename_template.replace("{i}", &counter.to_string())
    }
}

/// One completed file.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFile {
    pub path: String,
    pub rows: u64,
    /// Partition constraint of the file's directory.
    pub partition_expression: Expression,
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    /// Files in the order their directories were first written.
    pub files: Vec<WrittenFile>,
    pub total_rows: u64,
}

impl WriteSummary {
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }
}

struct OpenFile {
    writer: Box<dyn FileWriter>,
    path: String,
    rows: usize,
}

/// Sole owner of one output directory.
struct DirectoryWriter {
    dir: String,
    expression: Expression,
    counter: usize,
    current: Option<OpenFile>,
    completed: Vec<WrittenFile>,
    pending: Vec<RecordBatch>,
}

/// Shared, read-only state of a write.
struct WriteContext<'a> {
    options: &'a FileSystemDatasetWriteOptions,
    file_schema: SchemaRef,
}

impl DirectoryWriter {
    fn new(dir: String, expression: Expression) -> Self {
        Self {
            dir,
            expression,
            counter: 0,
            current: None,
            completed: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn open_next(&mut self, ctx: &WriteContext<'_>) -> Result<OpenFile> {
        let path = path::join(&self.dir, &ctx.options.basename(self.counter));
        self.counter += 1;
        let sink = ctx.options.filesystem.open_output_stream(&path)?;
        let writer = ctx.options.format.make_writer(
            sink,
            Arc::clone(&ctx.file_schema),
            &ctx.options.file_write_options,
        )?;
        debug!(path = %path, "opened output file");
        Ok(OpenFile {
            writer,
            path,
            rows: 0,
        })
    }

    fn flush_pending(&mut self, ctx: &WriteContext<'_>) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        pending.iter().try_for_each(|batch| self.write(batch, ctx))
    }

    fn write(&mut self, batch: &RecordBatch, ctx: &WriteContext<'_>) -> Result<()> {
        let limit = ctx.options.max_rows_per_file;
        let mut offset = 0;
        while offset < batch.num_rows() {
            let mut file = match self.current.take() {
                Some(file) => file,
                None => self.open_next(ctx)?,
            };
            let room = if limit == 0 {
                usize::MAX
            } else {
                limit - file.rows
            };
            let take = room.min(batch.num_rows() - offset);
            let written = file.writer.write(&batch.slice(offset, take));
            file.rows += take;
            offset += take;
            if let Err(e) = written {
                self.current = Some(file);
                return Err(e);
            }
            if limit > 0 && file.rows >= limit {
                self.complete(file)?;
            } else {
                self.current = Some(file);
            }
        }
        Ok(())
    }

    fn complete(&mut self, file: OpenFile) -> Result<()> {
        let rows = file.writer.finish()?;
        debug!(path = %file.path, rows, "closed output file");
        self.completed.push(WrittenFile {
            path: file.path,
            rows,
            partition_expression: self.expression.clone(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match self.current.take() {
            Some(file) => self.complete(file),
            None => Ok(()),
        }
    }

    /// Close whatever is open after a failure elsewhere.
    fn abort(&mut self) {
        if let Some(file) = self.current.take()
            && let Err(e) = file.writer.finish()
        {
            warn!(path = %file.path, error = %e, "closing output file after failure");
        }
    }
}

/// Write every batch `scanner` yields.
///
/// # Errors
/// See [`write_batches`].
pub fn write_dataset(options: &FileSystemDatasetWriteOptions, scanner: &Scanner) -> Result<WriteSummary> {
    let summary = write_batches(
        options,
        Arc::clone(scanner.projected_schema()),
        scanner.to_batches(),
    )?;
    let metrics = scanner.metrics();
    metrics.increment_counter(FILES_WRITTEN, summary.files.len() as u64);
    metrics.increment_counter(ROWS_WRITTEN, summary.total_rows);
    Ok(summary)
}

/// Write a batch stream with schema `schema` as a partitioned file set.
///
/// On failure every open file is closed before the error is returned; files
/// already completed stay in place.
///
/// # Errors
/// [`Error::Invalid`] for bad options or key columns missing from `schema`,
/// [`Error::AlreadyExists`] when `base_dir` holds files under
/// [`ExistingDataBehavior::Error`], and any error from the input stream, the
/// filesystem or the format.
pub fn write_batches(
    options: &FileSystemDatasetWriteOptions,
    schema: SchemaRef,
    batches: impl IntoIterator<Item = Result<RecordBatch>>,
) -> Result<WriteSummary> {
    options.validate()?;
    let key_schema = Arc::clone(options.partitioning.schema());
    let mut key_indices = Vec::with_capacity(key_schema.fields().len());
    for key in key_schema.fields() {
        let index = schema.index_of(key.name()).map_err(|_| {
            Error::invalid(format!("partition key '{}' is not a column of {schema}", key.name()))
        })?;
        key_indices.push(index);
    }
    let data_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !key_indices.contains(i))
        .collect();
    let file_schema = Arc::new(
        schema
            .project(&data_indices)
            .map_err(|e| Error::from_arrow("partitioned schema", e))?,
    );

    prepare_base_dir(options)?;
    let ctx = WriteContext {
        options,
        file_schema,
    };
    let executor = Executor::new(options.exec_mode)?;
    let mut writers: Vec<DirectoryWriter> = Vec::new();
    let mut by_key: HashMap<Vec<ScalarValue>, usize> = HashMap::new();
    let mut by_dir: HashMap<String, usize> = HashMap::new();

    let outcome = (|| -> Result<()> {
        for batch in batches {
            let batch = batch?;
            if batch.num_rows() == 0 {
                continue;
            }
            let data = batch
                .project(&data_indices)
                .map_err(|e| Error::from_arrow("partition split", e))?;
            for (key, rows) in group_rows(&batch, &key_indices, &key_schema)? {
                let slot = match by_key.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        let dir = path::join(&options.base_dir, &options.partitioning.format(&key)?);
                        let slot = match by_dir.get(&dir) {
                            Some(&slot) => slot,
                            None => {
                                let slot =
                                    open_directory(options, &key_schema, &key, &dir, &mut writers)?;
                                by_dir.insert(dir, slot);
                                slot
                            }
                        };
                        by_key.insert(key, slot);
                        slot
                    }
                };
                let part = if rows.len() == batch.num_rows() {
                    data.clone()
                } else {
                    take_record_batch(&data, &UInt32Array::from(rows))
                        .map_err(|e| Error::from_arrow("partition split", e))?
                };
                writers[slot].pending.push(part);
            }
            executor.for_each_mut(&mut writers, |w| w.flush_pending(&ctx))?;
        }
        executor.for_each_mut(&mut writers, DirectoryWriter::finish)
    })();

    if let Err(e) = outcome {
        for writer in &mut writers {
            writer.abort();
        }
        return Err(e);
    }

    let files: Vec<WrittenFile> = writers.into_iter().flat_map(|w| w.completed).collect();
    let total_rows = files.iter().map(|f| f.rows).sum();
    info!(
        base_dir = %options.base_dir,
        files = files.len(),
        rows = total_rows,
        "wrote dataset"
    );
    Ok(WriteSummary { files, total_rows })
}

/// Apply the existing-data policy that concerns the base directory as a whole.
fn prepare_base_dir(options: &FileSystemDatasetWriteOptions) -> Result<()> {
    let fs = &options.filesystem;
    if options.existing_data_behavior == ExistingDataBehavior::Error {
        let selector = FileSelector::new(&options.base_dir)
            .recursive(true)
            .allow_not_found(true);
        if fs.list_files(&selector)?.iter().any(|f| f.is_file()) {
            return Err(Error::AlreadyExists {
                path: options.base_dir.clone(),
            });
        }
    }
    fs.create_dir(&options.base_dir, true)
}

/// Register the writer owning `dir`, honouring the partition limit and the
/// delete-matching policy.
fn open_directory(
    options: &FileSystemDatasetWriteOptions,
    key_schema: &Schema,
    key: &[ScalarValue],
    dir: &str,
    writers: &mut Vec<DirectoryWriter>,
) -> Result<usize> {
    if writers.len() >= options.max_partitions {
        return Err(Error::invalid(format!(
            "write would create more than {} partitions",
            options.max_partitions
        )));
    }
    if options.existing_data_behavior == ExistingDataBehavior::DeleteMatching
        && options.filesystem.get_file_info(dir)?.is_dir()
    {
        debug!(dir = %dir, "deleting existing partition contents");
        options.filesystem.delete_dir_contents(dir)?;
    }
    let expression = conjunction(
        key_schema
            .fields()
            .iter()
            .zip(key)
            .map(|(f, v)| key_equals(f.name(), v.clone())),
    );
    writers.push(DirectoryWriter::new(dir.to_string(), expression));
    Ok(writers.len() - 1)
}

/// Row indices of `batch` grouped by partition key tuple, in first-seen order.
fn group_rows(
    batch: &RecordBatch,
    key_indices: &[usize],
    key_schema: &Schema,
) -> Result<Vec<(Vec<ScalarValue>, Vec<u32>)>> {
    let rows = batch.num_rows();
    if key_indices.is_empty() {
        return Ok(vec![(Vec::new(), (0..rows as u32).collect())]);
    }
    let key_columns = key_indices
        .iter()
        .zip(key_schema.fields())
        .map(|(&i, key)| {
            let column = cast(batch.column(i), key.data_type())
                .map_err(|e| Error::from_arrow(key.name().as_str(), e))?;
            ScalarValue::from_array(&column)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut groups: Vec<(Vec<ScalarValue>, Vec<u32>)> = Vec::new();
    let mut seen: HashMap<Vec<ScalarValue>, usize> = HashMap::new();
    for row in 0..rows {
        let key: Vec<ScalarValue> = key_columns.iter().map(|c| c[row].clone()).collect();
        let row = u32::try_from(row).map_err(|_| Error::invalid("batch too large to partition"))?;
        match seen.get(&key) {
            Some(&g) => groups[g].1.push(row),
            None => {
                seen.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    Ok(groups)
}

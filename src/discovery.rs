//! Dataset discovery: turn a file listing into a [`FileSystemDataset`].
//!
//! Discovery runs in three steps. [`FileSystemDatasetFactory::make`] lists the
//! candidate files, [`inspect`](FileSystemDatasetFactory::inspect) reads every
//! file's physical schema on the worker pool and unifies them with the
//! partition schema, and [`finish`](FileSystemDatasetFactory::finish) parses
//! each path into a partition expression and builds the fragments.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata::discovery::{FileSystemDatasetFactory, FileSystemFactoryOptions};
//! use strata::format::ParquetFileFormat;
//! use strata::fs::{FileSelector, from_uri_or_path};
//! use strata::partitioning::HivePartitioning;
//!
//! let (fs, root) = from_uri_or_path("/data/events")?;
//! let options = FileSystemFactoryOptions {
//!     partitioning: HivePartitioning::factory().into(),
//!     ..Default::default()
//! };
//! let factory = FileSystemDatasetFactory::make(
//!     fs,
//!     FileSelector::new(root).recursive(true),
//!     Arc::new(ParquetFileFormat::default()),
//!     options,
//! )?;
//! let dataset = factory.finish()?;
//! println!("{} files", dataset.files().len());
//! # Ok::<(), strata::Error>(())
//! ```

use crate::dataset::FileSystemDataset;
use crate::error::{Error, Result};
use crate::executor::{ExecMode, Executor};
use crate::format::{FileFormat, FileSource};
use crate::fragment::FileFragment;
use crate::fs::{FileInfo, FileSelector, FileSystem, path};
use crate::partitioning::{Partitioning, PartitioningFactory, PartitioningOrFactory};
use crate::schema::{check_unique_names, unify_schemas, with_partition_fields};
use arrow::datatypes::{Field, Schema, SchemaRef};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// How discovery treats the listed files.
#[derive(Debug, Clone)]
pub struct FileSystemFactoryOptions {
    /// Fixed scheme, or a factory that infers the key schema from the paths.
    pub partitioning: PartitioningOrFactory,
    /// Directory partition segments are parsed relative to; defaults to the
    /// selector's base directory.
    pub partition_base_dir: Option<String>,
    /// Drop files the format does not recognise instead of failing on them.
    pub exclude_invalid_files: bool,
    /// Path components starting with any of these are skipped.
    pub selector_ignore_prefixes: Vec<String>,
    /// Scheduling of schema inspection.
    pub exec_mode: ExecMode,
}

impl Default for FileSystemFactoryOptions {
    fn default() -> Self {
        Self {
            partitioning: PartitioningOrFactory::default(),
            partition_base_dir: None,
            exclude_invalid_files: false,
            selector_ignore_prefixes: vec![".".into(), "_".into()],
            exec_mode: ExecMode::default(),
        }
    }
}

/// Discovers fragments and their unified schema.
pub struct FileSystemDatasetFactory {
    fs: Arc<dyn FileSystem>,
    format: Arc<dyn FileFormat>,
    options: FileSystemFactoryOptions,
    partition_base_dir: String,
    files: Vec<FileInfo>,
    schemas: OnceLock<Vec<SchemaRef>>,
}

impl FileSystemDatasetFactory {
    /// List the files under `selector`.
    ///
    /// Directories and paths with an ignored component are dropped. With
    /// `exclude_invalid_files`, files the format does not recognise are
    /// dropped too.
    ///
    /// # Errors
    /// `NotFound` if the base directory is missing (unless the selector
    /// allows it), `Io` on listing failures.
    pub fn make(
        fs: Arc<dyn FileSystem>,
        selector: FileSelector,
        format: Arc<dyn FileFormat>,
        options: FileSystemFactoryOptions,
    ) -> Result<Self> {
        let listed = fs.list_files(&selector)?;
        let total = listed.len();
        let mut files = Vec::with_capacity(total);
        for info in listed {
            if !info.is_file() {
                continue;
            }
            let rel = path::relative_to(&selector.base_dir, &info.path).unwrap_or(&info.path);
            if is_ignored(rel, &options.selector_ignore_prefixes) {
                debug!(path = %info.path, "ignored by prefix");
                continue;
            }
            if options.exclude_invalid_files {
                let source = FileSource::new(Arc::clone(&fs), info.path.clone()).with_size(info.size);
                if !format.is_supported(&source)? {
                    debug!(path = %info.path, format = format.type_name(), "excluded unsupported file");
                    continue;
                }
            }
            files.push(info);
        }
        debug!(
            base_dir = %selector.base_dir,
            listed = total,
            kept = files.len(),
            "listed dataset files"
        );
        let partition_base_dir = options
            .partition_base_dir
            .as_deref()
            .map_or_else(|| selector.base_dir.clone(), path::normalize);
        Ok(Self {
            fs,
            format,
            options,
            partition_base_dir,
            files,
            schemas: OnceLock::new(),
        })
    }

    /// Use an explicit file list instead of a directory listing.
    ///
    /// # Errors
    /// `NotFound` if a path is missing or is not a regular file.
    pub fn from_paths(
        fs: Arc<dyn FileSystem>,
        paths: impl IntoIterator<Item = impl AsRef<str>>,
        format: Arc<dyn FileFormat>,
        options: FileSystemFactoryOptions,
    ) -> Result<Self> {
        let files = paths
            .into_iter()
            .map(|p| {
                let info = fs.get_file_info(&path::normalize(p.as_ref()))?;
                if info.is_file() {
                    Ok(info)
                } else {
                    Err(Error::not_found(info.path))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let partition_base_dir = options
            .partition_base_dir
            .as_deref()
            .map(path::normalize)
            .unwrap_or_default();
        Ok(Self {
            fs,
            format,
            options,
            partition_base_dir,
            files,
            schemas: OnceLock::new(),
        })
    }

    /// Paths of the discovered files, in listing order.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    fn source(&self, info: &FileInfo) -> FileSource {
        FileSource::new(Arc::clone(&self.fs), info.path.clone()).with_size(info.size)
    }

    fn partition_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| {
                path::relative_to(&self.partition_base_dir, &f.path)
                    .unwrap_or(&f.path)
                    .to_string()
            })
            .collect()
    }

    /// Physical schema of every file, in listing order.
    ///
    /// Files are inspected concurrently; any failure aborts the whole call.
    /// Results are cached for [`finish`](Self::finish).
    ///
    /// # Errors
    /// The first inspection error, or [`Error::Schema`] for duplicate column
    /// names inside one file.
    pub fn inspect_schemas(&self) -> Result<Vec<SchemaRef>> {
        if let Some(schemas) = self.schemas.get() {
            return Ok(schemas.clone());
        }
        let executor = Executor::new(self.options.exec_mode)?;
        let schemas = executor.scatter_gather(self.files.iter().collect(), |_, info| {
            let schema = self.format.inspect(&self.source(info))?;
            check_unique_names(&schema, &info.path)?;
            Ok(schema)
        })?;
        Ok(self.schemas.get_or_init(|| schemas).clone())
    }

    fn partition_schema(&self) -> Result<SchemaRef> {
        match &self.options.partitioning {
            PartitioningOrFactory::Explicit(p) => Ok(Arc::clone(p.schema())),
            PartitioningOrFactory::Inferred(f) => f.inspect(&self.partition_paths()),
        }
    }

    /// The unified dataset schema: physical columns first, partition keys after.
    ///
    /// # Errors
    /// Inspection errors, or [`Error::Schema`] when column types cannot be reconciled.
    pub fn inspect(&self) -> Result<SchemaRef> {
        let physical = self.inspect_schemas()?;
        let unified = unify_schemas(physical.iter().map(AsRef::as_ref))?;
        let partition = self.partition_schema()?;
        Ok(Arc::new(with_partition_fields(&unified, &partition)?))
    }

    /// Build the dataset with the inspected schema.
    ///
    /// # Errors
    /// See [`inspect`](Self::inspect) and [`finish_with_schema`](Self::finish_with_schema).
    pub fn finish(&self) -> Result<Arc<FileSystemDataset>> {
        let schema = self.inspect()?;
        self.finish_with_schema(schema)
    }

    /// Build the dataset with a caller-supplied schema.
    ///
    /// Inferred partition keys take their type from `schema` when it names
    /// them.
    ///
    /// # Errors
    /// [`Error::Invalid`] if a path segment does not parse as its key type.
    pub fn finish_with_schema(&self, schema: SchemaRef) -> Result<Arc<FileSystemDataset>> {
        let partitioning = self.resolve_partitioning(&schema)?;
        let cached = self.schemas.get();
        let fragments = self
            .files
            .iter()
            .zip(self.partition_paths())
            .enumerate()
            .map(|(i, (info, rel))| {
                let expr = partitioning.parse(&rel)?;
                let fragment = FileFragment::new(self.source(info), Arc::clone(&self.format), expr);
                Ok(match cached.and_then(|s| s.get(i)) {
                    Some(physical) => fragment.with_physical_schema(Arc::clone(physical)),
                    None => fragment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            files = fragments.len(),
            columns = schema.fields().len(),
            partitioning = partitioning.type_name(),
            "discovered dataset"
        );
        Ok(Arc::new(FileSystemDataset::new(
            schema,
            Arc::clone(&self.fs),
            Arc::clone(&self.format),
            partitioning,
            fragments,
        )))
    }

    fn resolve_partitioning(&self, schema: &SchemaRef) -> Result<Arc<dyn Partitioning>> {
        let factory: &Arc<dyn PartitioningFactory> = match &self.options.partitioning {
            PartitioningOrFactory::Explicit(p) => return Ok(Arc::clone(p)),
            PartitioningOrFactory::Inferred(f) => f,
        };
        let inferred = factory.inspect(&self.partition_paths())?;
        let keys: Vec<Field> = inferred
            .fields()
            .iter()
            .map(|key| match schema.field_with_name(key.name()) {
                Ok(declared) => Field::new(key.name(), declared.data_type().clone(), true),
                Err(_) => key.as_ref().clone(),
            })
            .collect();
        factory.finish(&Arc::new(Schema::new(keys)))
    }
}

fn is_ignored(rel: &str, prefixes: &[String]) -> bool {
    path::segments(rel).any(|segment| prefixes.iter().any(|p| segment.starts_with(p.as_str())))
}

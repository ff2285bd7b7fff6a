//! # Strata
//!
//! Treat a directory tree of columnar files as **one logical table**: discover
//! the files, infer how their paths encode partition keys, scan them with
//! projection and filter pushdown, and write tables back out as new
//! partitioned file sets. Built on Apache Arrow record batches.
//!
//! ## Key Features
//!
//! - **Filesystem abstraction** - local directories and an in-memory store behind one trait
//! - **Pluggable formats** - Parquet, Arrow IPC, CSV and newline-delimited JSON
//! - **Partitioning** - Hive `key=value` and positional directory layouts, inferred or declared
//! - **Schema unification** - fragments with drifting schemas merge into one with lossless promotion
//! - **Pruning** - whole fragments by partition value, Parquet row groups by statistics
//! - **Parallel scans** - bounded worker pool with results in discovery order
//! - **Partitioned writes** - one writer per directory, file rollover, existing-data policies
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata::prelude::*;
//!
//! # fn main() -> strata::Result<()> {
//! let (fs, root) = from_uri_or_path("/data/events")?;
//! let factory = FileSystemDatasetFactory::make(
//!     fs,
//!     FileSelector::new(root).recursive(true),
//!     Arc::new(ParquetFileFormat::default()),
//!     FileSystemFactoryOptions {
//!         partitioning: HivePartitioning::factory().into(),
//!         ..Default::default()
//!     },
//! )?;
//! let dataset = factory.finish()?;
//!
//! let table = dataset
//!     .new_scan()
//!     .project(["user", "amount"])
//!     .filter(field("year").equal(lit(2024)))
//!     .finish()?
//!     .to_table()?;
//! println!("{table}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Fragments and datasets
//!
//! A [`Fragment`] is one independently readable piece of data (usually a
//! file) plus a *partition expression* that every row in it satisfies. A
//! [`Dataset`] is an ordered list of fragments with one unified schema.
//!
//! ### Discovery
//!
//! [`FileSystemDatasetFactory`] lists files with a [`FileSelector`], inspects
//! each file's schema, unifies them, infers or applies a [`Partitioning`], and
//! builds a [`FileSystemDataset`].
//!
//! ### Scanning
//!
//! [`ScannerBuilder`] validates projection and filter against the dataset
//! schema. The [`Scanner`] skips fragments whose partition expression
//! contradicts the filter, lets formats skip what their metadata rules out,
//! and always re-applies the filter to the rows it reads.
//!
//! ### Writing
//!
//! [`write_dataset`] routes each row to the directory its partition key tuple
//! formats to and names files from a basename template such as
//! `part-{i}.parquet`.
//!
//! ## Errors
//!
//! Every fallible call returns [`Result`], whose [`Error`] carries an
//! [`ErrorKind`] for programmatic matching.

pub mod compression;
pub mod config;
pub mod dataset;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod expression;
pub mod format;
pub mod fragment;
pub mod fs;
pub mod metrics;
pub mod partitioning;
pub mod scanner;
pub mod schema;
pub mod table;
pub mod testing;
pub mod writer;

pub use config::EngineConfig;
pub use dataset::{Dataset, FileSystemDataset, InMemoryDataset};
pub use discovery::{FileSystemDatasetFactory, FileSystemFactoryOptions};
pub use error::{Error, ErrorKind, Result};
pub use executor::{ExecMode, Executor};
pub use expression::{Expression, ScalarValue, field, lit};
pub use format::{
    CsvFileFormat, FileFormat, FileWriteOptions, IpcFileFormat, JsonFileFormat, ParquetFileFormat,
};
pub use fragment::{FileFragment, Fragment, InMemoryFragment};
pub use fs::{FileInfo, FileSelector, FileSystem, LocalFileSystem, MemoryFileSystem, from_uri_or_path};
pub use metrics::MetricsCollector;
pub use partitioning::{
    DirectoryPartitioning, HivePartitioning, NoPartitioning, Partitioning, PartitioningFactory,
    PartitioningOrFactory,
};
pub use scanner::{CancellationToken, RecordBatchStream, ScanOptions, Scanner, ScannerBuilder};
pub use table::Table;
pub use writer::{
    ExistingDataBehavior, FileSystemDatasetWriteOptions, WriteSummary, WrittenFile, write_batches,
    write_dataset,
};

/// The names most programs need, for glob import.
pub mod prelude {
    pub use crate::dataset::{Dataset, FileSystemDataset, InMemoryDataset};
    pub use crate::discovery::{FileSystemDatasetFactory, FileSystemFactoryOptions};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::expression::{Expression, field, is_null, lit, not};
    pub use crate::format::{
        CsvFileFormat, FileFormat, IpcFileFormat, JsonFileFormat, ParquetFileFormat,
    };
    pub use crate::fs::{FileSelector, FileSystem, from_uri_or_path};
    pub use crate::partitioning::{DirectoryPartitioning, HivePartitioning, Partitioning};
    pub use crate::scanner::{Scanner, ScannerBuilder};
    pub use crate::table::Table;
    pub use crate::writer::{ExistingDataBehavior, FileSystemDatasetWriteOptions, write_dataset};
}

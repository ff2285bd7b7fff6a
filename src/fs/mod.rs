//! Filesystem abstraction used for discovery, reading and writing.
//!
//! Every backend exposes the same small surface: create and delete directories,
//! list files under a [`FileSelector`], open a random-access [`InputFile`] and
//! open a closeable [`OutputStream`]. Paths are `/`-separated strings relative
//! to a root fixed at construction time (see [`from_uri_or_path`]).
//!
//! Two backends ship with the crate:
//! - [`LocalFileSystem`] - a directory on the local disk
//! - [`MemoryFileSystem`] - an in-process store, handy for tests and scratch datasets

mod local;
mod memory;
pub mod path;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

use crate::error::{Error, Result};
use bytes::Bytes;
use parquet::file::reader::{ChunkReader, Length};
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use url::Url;

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    NotFound,
    File,
    Directory,
}

/// Result of a listing or a stat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub file_type: FileType,
    pub size: Option<u64>,
}

impl FileInfo {
    #[must_use]
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::File,
            size: Some(size),
        }
    }

    #[must_use]
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::Directory,
            size: None,
        }
    }

    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::NotFound,
            size: None,
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Last path segment.
    #[must_use]
    pub fn base_name(&self) -> &str {
        path::basename(&self.path)
    }
}

/// Describes which entries a listing should return.
#[derive(Debug, Clone)]
pub struct FileSelector {
    /// Directory to list, relative to the filesystem root.
    pub base_dir: String,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Return an empty listing instead of `NotFound` when `base_dir` is missing.
    pub allow_not_found: bool,
    /// Optional glob matched against file base names (directories are unaffected).
    pub pattern: Option<glob::Pattern>,
}

impl FileSelector {
    pub fn new(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: path::normalize(&base_dir.into()),
            recursive: false,
            allow_not_found: false,
            pattern: None,
        }
    }

    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub fn allow_not_found(mut self, allow: bool) -> Self {
        self.allow_not_found = allow;
        self
    }

    /// Keep only files whose base name matches `pattern` (e.g. `*.parquet`).
    ///
    /// # Errors
    /// Returns [`Error::Invalid`] if the glob pattern does not parse.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| Error::invalid(format!("invalid glob pattern {pattern}: {e}")))?;
        self.pattern = Some(compiled);
        Ok(self)
    }

    pub(crate) fn accepts(&self, info: &FileInfo) -> bool {
        match (&self.pattern, info.file_type) {
            (Some(pattern), FileType::File) => pattern.matches(info.base_name()),
            _ => true,
        }
    }
}

/// A writable stream whose contents become visible once [`close`](OutputStream::close) succeeds.
pub trait OutputStream: Write + Send {
    /// Destination path of this stream.
    fn path(&self) -> &str;

    /// Flush buffered data and release the handle.
    ///
    /// # Errors
    /// Returns an I/O error if the final flush fails.
    fn close(self: Box<Self>) -> Result<()>;
}

/// A readable, seekable handle usable as a random-access source for Parquet.
pub struct InputFile {
    path: String,
    size: u64,
    inner: InputInner,
}

enum InputInner {
    Local(File),
    Memory(Cursor<Bytes>),
}

impl InputFile {
    pub(crate) fn local(path: impl Into<String>, file: File, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            inner: InputInner::Local(file),
        }
    }

    pub(crate) fn memory(path: impl Into<String>, data: Bytes) -> Self {
        Self {
            path: path.into(),
            size: data.len() as u64,
            inner: InputInner::Memory(Cursor::new(data)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Read `length` bytes at `offset` without moving the cursor.
    ///
    /// # Errors
    /// Returns an I/O error if the range cannot be read.
    pub fn read_at(&self, offset: u64, length: usize) -> Result<Bytes> {
        ChunkReader::get_bytes(self, offset, length)
            .map_err(|e| Error::from_parquet(self.path.clone(), e))
    }
}

impl fmt::Debug for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Read for InputFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            InputInner::Local(f) => f.read(buf),
            InputInner::Memory(c) => c.read(buf),
        }
    }
}

impl Seek for InputFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match &mut self.inner {
            InputInner::Local(f) => f.seek(pos),
            InputInner::Memory(c) => c.seek(pos),
        }
    }
}

impl Length for InputFile {
    fn len(&self) -> u64 {
        self.size
    }
}

impl ChunkReader for InputFile {
    type T = Box<dyn Read + Send>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        match &self.inner {
            InputInner::Local(f) => Ok(Box::new(ChunkReader::get_read(f, start)?)),
            InputInner::Memory(c) => Ok(Box::new(ChunkReader::get_read(c.get_ref(), start)?)),
        }
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        match &self.inner {
            InputInner::Local(f) => ChunkReader::get_bytes(f, start, length),
            InputInner::Memory(c) => ChunkReader::get_bytes(c.get_ref(), start, length),
        }
    }
}

/// Uniform storage interface shared by discovery, scanning and writing.
///
/// Implementations must be safe to share across worker threads; stream objects
/// they hand out are owned by a single task.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Short backend name (`"local"`, `"memory"`).
    fn type_name(&self) -> &'static str;

    /// Ensure `path` exists as a directory. Succeeds if it already does.
    ///
    /// # Errors
    /// `NotFound` if `recursive` is false and the parent is missing, `Io` on
    /// permission or medium failures, `AlreadyExists` if a file occupies `path`.
    fn create_dir(&self, path: &str, recursive: bool) -> Result<()>;

    /// Remove everything inside `path`, keeping the directory itself.
    ///
    /// # Errors
    /// `NotFound` if `path` does not exist, `Io` on failure.
    fn delete_dir_contents(&self, path: &str) -> Result<()>;

    /// Remove a single file.
    ///
    /// # Errors
    /// `NotFound` if `path` does not exist, `Io` on failure.
    fn delete_file(&self, path: &str) -> Result<()>;

    /// Stat a path. Missing paths yield [`FileType::NotFound`] rather than an error.
    ///
    /// # Errors
    /// `Io` if the backend cannot answer.
    fn get_file_info(&self, path: &str) -> Result<FileInfo>;

    /// List entries under the selector's base directory, sorted by path.
    ///
    /// # Errors
    /// `NotFound` if the base directory is missing and the selector does not allow it.
    fn list_files(&self, selector: &FileSelector) -> Result<Vec<FileInfo>>;

    /// Open a file for random-access reads.
    ///
    /// # Errors
    /// `NotFound` if the file is missing, `Io` on failure.
    fn open_input_file(&self, path: &str) -> Result<InputFile>;

    /// Open a file for writing from the start, truncating existing content.
    /// Missing parent directories are created.
    ///
    /// # Errors
    /// `Io` if the file cannot be created.
    fn open_output_stream(&self, path: &str) -> Result<Box<dyn OutputStream>>;
}

/// Resolve a URI (`file:///data/set`, `memory://scratch/set`) or a local path
/// into a filesystem plus the path of the target inside it.
///
/// Local targets get a filesystem rooted at `/` and the absolute path with its
/// leading separator stripped; relative local paths are made absolute against
/// the current working directory first. Each `memory://` URI creates a fresh,
/// empty store.
///
/// # Errors
/// [`Error::Invalid`] for malformed URIs or unsupported schemes.
pub fn from_uri_or_path(uri_or_path: &str) -> Result<(Arc<dyn FileSystem>, String)> {
    if uri_or_path.contains("://") {
        let url = Url::parse(uri_or_path)
            .map_err(|e| Error::invalid(format!("cannot parse URI {uri_or_path}: {e}")))?;
        return match url.scheme() {
            "file" => {
                let local = url
                    .to_file_path()
                    .map_err(|()| Error::invalid(format!("not a local file URI: {uri_or_path}")))?;
                Ok(local_root(&local))
            }
            "memory" | "mem" => {
                let inner = path::join(url.host_str().unwrap_or_default(), url.path());
                Ok((Arc::new(MemoryFileSystem::new()), inner))
            }
            other => Err(Error::invalid(format!(
                "unsupported filesystem scheme '{other}' in {uri_or_path}"
            ))),
        };
    }

    let candidate = std::path::PathBuf::from(uri_or_path);
    let absolute = if candidate.is_absolute() {
        candidate
    } else {
        std::env::current_dir()
            .map_err(|e| Error::io("resolve current directory", e))?
            .join(candidate)
    };
    Ok(local_root(&absolute))
}

fn local_root(absolute: &std::path::Path) -> (Arc<dyn FileSystem>, String) {
    let inner = path::normalize(&absolute.to_string_lossy().replace('\\', "/"));
    (Arc::new(LocalFileSystem::new("/")), inner)
}

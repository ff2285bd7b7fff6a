//! In-memory backend.
//!
//! Files live in a shared map guarded by a mutex, so clones of a
//! [`MemoryFileSystem`] observe the same contents. Output streams buffer
//! privately and publish their bytes only on `close`, so an abandoned stream
//! never leaves a partial file behind.

use super::{FileInfo, FileSelector, FileSystem, InputFile, OutputStream, path};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryStore {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
}

impl MemoryStore {
    fn is_dir(&self, p: &str) -> bool {
        p.is_empty() || self.dirs.contains(p)
    }

    fn add_ancestors(&mut self, p: &str) {
        let mut current = path::parent(p).to_string();
        while !current.is_empty() {
            self.dirs.insert(current.clone());
            current = path::parent(&current).to_string();
        }
    }
}

/// Thread-safe in-memory filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `data` at `path` directly, creating parent directories.
    pub fn put(&self, p: &str, data: impl Into<Bytes>) {
        let p = path::normalize(p);
        let mut store = self.store();
        store.add_ancestors(&p);
        store.files.insert(p, data.into());
    }

    /// Fetch the full contents of a file.
    ///
    /// # Errors
    /// `NotFound` if no file is stored at `path`.
    pub fn read(&self, p: &str) -> Result<Bytes> {
        let p = path::normalize(p);
        self.store()
            .files
            .get(&p)
            .cloned()
            .ok_or_else(|| Error::not_found(p))
    }

    /// Number of files currently stored.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.store().files.len()
    }
}

impl FileSystem for MemoryFileSystem {
    fn type_name(&self) -> &'static str {
        "memory"
    }

    fn create_dir(&self, p: &str, recursive: bool) -> Result<()> {
        let p = path::normalize(p);
        let mut store = self.store();
        if store.is_dir(&p) {
            return Ok(());
        }
        if store.files.contains_key(&p) {
            return Err(Error::AlreadyExists { path: p });
        }
        if !recursive && !store.is_dir(path::parent(&p)) {
            return Err(Error::not_found(path::parent(&p).to_string()));
        }
        store.add_ancestors(&p);
        store.dirs.insert(p.clone());
        drop(store);
        debug!(path = %p, "created directory");
        Ok(())
    }

    fn delete_dir_contents(&self, p: &str) -> Result<()> {
        let p = path::normalize(p);
        let mut store = self.store();
        if !store.is_dir(&p) {
            return Err(Error::not_found(p));
        }
        let inside = |key: &String| path::relative_to(&p, key).is_some_and(|r| !r.is_empty());
        store.files.retain(|k, _| !inside(k));
        store.dirs.retain(|k| !inside(k));
        Ok(())
    }

    fn delete_file(&self, p: &str) -> Result<()> {
        let p = path::normalize(p);
        self.store()
            .files
            .remove(&p)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(p))
    }

    fn get_file_info(&self, p: &str) -> Result<FileInfo> {
        let p = path::normalize(p);
        let store = self.store();
        if let Some(data) = store.files.get(&p) {
            return Ok(FileInfo::file(p, data.len() as u64));
        }
        if store.is_dir(&p) {
            return Ok(FileInfo::directory(p));
        }
        Ok(FileInfo::not_found(p))
    }

    fn list_files(&self, selector: &FileSelector) -> Result<Vec<FileInfo>> {
        let base = path::normalize(&selector.base_dir);
        let store = self.store();
        if !store.is_dir(&base) {
            if selector.allow_not_found {
                return Ok(Vec::new());
            }
            return Err(Error::not_found(base));
        }

        let wanted = |key: &str| match path::relative_to(&base, key) {
            Some(rel) if !rel.is_empty() => selector.recursive || !rel.contains('/'),
            _ => false,
        };

        let mut out: Vec<FileInfo> = store
            .dirs
            .iter()
            .filter(|d| wanted(d))
            .map(|d| FileInfo::directory(d.clone()))
            .chain(
                store
                    .files
                    .iter()
                    .filter(|(k, _)| wanted(k))
                    .map(|(k, v)| FileInfo::file(k.clone(), v.len() as u64)),
            )
            .filter(|info| selector.accepts(info))
            .collect();
        drop(store);
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn open_input_file(&self, p: &str) -> Result<InputFile> {
        let p = path::normalize(p);
        let store = self.store();
        match store.files.get(&p) {
            Some(data) => Ok(InputFile::memory(p.clone(), data.clone())),
            None if store.is_dir(&p) => Err(Error::invalid(format!(
                "cannot open directory '{p}' for reading"
            ))),
            None => Err(Error::not_found(p)),
        }
    }

    fn open_output_stream(&self, p: &str) -> Result<Box<dyn OutputStream>> {
        let p = path::normalize(p);
        if self.store().is_dir(&p) {
            return Err(Error::AlreadyExists { path: p });
        }
        Ok(Box::new(MemoryOutputStream {
            store: Arc::clone(&self.store),
            path: p,
            buffer: Vec::new(),
        }))
    }
}

struct MemoryOutputStream {
    store: Arc<Mutex<MemoryStore>>,
    path: String,
    buffer: Vec<u8>,
}

impl Write for MemoryOutputStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputStream for MemoryOutputStream {
    fn path(&self) -> &str {
        &self.path
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self {
            store,
            path: p,
            buffer,
        } = *self;
        let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
        store.add_ancestors(&p);
        store.files.insert(p, Bytes::from(buffer));
        Ok(())
    }
}

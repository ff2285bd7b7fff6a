//! Local-disk backend rooted at a directory.

use super::{FileInfo, FileSelector, FileSystem, InputFile, OutputStream, path};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Filesystem backed by `std::fs`, with every path resolved under `root`.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a root-relative path onto the local disk, refusing to escape the root.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let normalized = path::normalize(rel);
        let mut out = self.root.clone();
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::invalid(format!(
                        "path '{rel}' escapes the filesystem root"
                    )));
                }
            }
        }
        Ok(out)
    }

    fn walk(
        &self,
        dir: &Path,
        rel_dir: &str,
        selector: &FileSelector,
        out: &mut Vec<FileInfo>,
    ) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| Error::io(rel_dir.to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(rel_dir.to_string(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = path::join(rel_dir, &name);
            let meta = entry.metadata().map_err(|e| Error::io(rel.clone(), e))?;
            if meta.is_dir() {
                out.push(FileInfo::directory(rel.clone()));
                if selector.recursive {
                    self.walk(&entry.path(), &rel, selector, out)?;
                }
            } else {
                let info = FileInfo::file(rel, meta.len());
                if selector.accepts(&info) {
                    out.push(info);
                }
            }
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn type_name(&self) -> &'static str {
        "local"
    }

    fn create_dir(&self, rel: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(rel)?;
        if target.is_dir() {
            return Ok(());
        }
        if target.exists() {
            return Err(Error::AlreadyExists {
                path: rel.to_string(),
            });
        }
        let created = if recursive {
            fs::create_dir_all(&target)
        } else {
            fs::create_dir(&target)
        };
        match created {
            Ok(()) => {
                debug!(path = rel, "created directory");
                Ok(())
            }
            // Lost a race with another creator; the directory is there now.
            Err(_) if target.is_dir() => Ok(()),
            Err(e) => Err(Error::io(rel.to_string(), e)),
        }
    }

    fn delete_dir_contents(&self, rel: &str) -> Result<()> {
        let target = self.resolve(rel)?;
        let entries = fs::read_dir(&target).map_err(|e| Error::io(rel.to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(rel.to_string(), e))?;
            let p = entry.path();
            let removed = if p.is_dir() {
                fs::remove_dir_all(&p)
            } else {
                fs::remove_file(&p)
            };
            removed.map_err(|e| Error::io(p.display().to_string(), e))?;
        }
        Ok(())
    }

    fn delete_file(&self, rel: &str) -> Result<()> {
        let target = self.resolve(rel)?;
        fs::remove_file(&target).map_err(|e| Error::io(rel.to_string(), e))
    }

    fn get_file_info(&self, rel: &str) -> Result<FileInfo> {
        let target = self.resolve(rel)?;
        let normalized = path::normalize(rel);
        match fs::metadata(&target) {
            Ok(meta) if meta.is_dir() => Ok(FileInfo::directory(normalized)),
            Ok(meta) => Ok(FileInfo::file(normalized, meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(FileInfo::not_found(normalized))
            }
            Err(e) => Err(Error::io(rel.to_string(), e)),
        }
    }

    fn list_files(&self, selector: &FileSelector) -> Result<Vec<FileInfo>> {
        let base = self.resolve(&selector.base_dir)?;
        if !base.exists() {
            if selector.allow_not_found {
                return Ok(Vec::new());
            }
            return Err(Error::not_found(selector.base_dir.clone()));
        }
        if !base.is_dir() {
            return Err(Error::invalid(format!(
                "cannot list '{}': not a directory",
                selector.base_dir
            )));
        }

        let mut out = Vec::new();
        self.walk(&base, &selector.base_dir, selector, &mut out)?;
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn open_input_file(&self, rel: &str) -> Result<InputFile> {
        let target = self.resolve(rel)?;
        let file = File::open(&target).map_err(|e| Error::io(rel.to_string(), e))?;
        let meta = file.metadata().map_err(|e| Error::io(rel.to_string(), e))?;
        if meta.is_dir() {
            return Err(Error::invalid(format!("cannot open directory '{rel}' for reading")));
        }
        Ok(InputFile::local(path::normalize(rel), file, meta.len()))
    }

    fn open_output_stream(&self, rel: &str) -> Result<Box<dyn OutputStream>> {
        let target = self.resolve(rel)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(rel.to_string(), e))?;
        }
        let file = File::create(&target).map_err(|e| Error::io(rel.to_string(), e))?;
        Ok(Box::new(LocalOutputStream {
            path: path::normalize(rel),
            writer: BufWriter::new(file),
        }))
    }
}

struct LocalOutputStream {
    path: String,
    writer: BufWriter<File>,
}

impl Write for LocalOutputStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl OutputStream for LocalOutputStream {
    fn path(&self) -> &str {
        &self.path
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self { path, writer } = *self;
        let file = writer
            .into_inner()
            .map_err(|e| Error::io(path.clone(), e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(path, e))
    }
}

//! Pluggable stream compression for the text formats (CSV, JSON).
//!
//! Codecs are looked up by file extension first (`part0.csv.gz`) and, on the
//! read side, by magic bytes when the extension says nothing. The built-in
//! codecs are feature-gated:
//!
//! - **Gzip** (`.gz`) - `compression-gzip`
//! - **Zstd** (`.zst`) - `compression-zstd`
//! - **Bzip2** (`.bz2`) - `compression-bzip2`
//! - **Xz** (`.xz`) - `compression-xz`
//!
//! Custom codecs can be added at runtime with [`register_codec`].
//!
//! Compressed writers wrap an [`OutputStream`]; closing the wrapper finishes the
//! encoder and then closes the underlying stream, so the trailer is always on
//! disk before the file becomes visible.

use crate::error::{Error, Result};
use crate::fs::OutputStream;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::{Arc, PoisonError, RwLock};

static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn CompressionCodec>>>> = RwLock::new(None);

fn init_registry() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

fn registry() -> Vec<Arc<dyn CompressionCodec>> {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).clone()
}

/// Register a custom codec. Later registrations are consulted after the built-ins.
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).push(codec);
}

/// A streaming compression algorithm.
///
/// Implementations are stored in a global registry and shared across worker
/// threads, hence `Send + Sync`.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g. "gzip").
    fn name(&self) -> &str;

    /// Lowercase extensions including the leading dot (e.g. `&[".gz"]`).
    fn extensions(&self) -> &[&str];

    /// Signature at the start of a compressed stream, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap `reader` with a decompressor.
    ///
    /// # Errors
    /// Returns an I/O error if the decoder cannot be initialised.
    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>>;

    /// Wrap `sink` with a compressor whose `close` finishes the stream.
    ///
    /// # Errors
    /// Returns an I/O error if the encoder cannot be initialised.
    fn wrap_writer(&self, sink: Box<dyn OutputStream>) -> Result<Box<dyn OutputStream>>;
}

/// Codec registered for the extension of `path`, if any.
#[must_use]
pub fn codec_for_path(path: &str) -> Option<Arc<dyn CompressionCodec>> {
    let lower = path.to_ascii_lowercase();
    registry()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| lower.ends_with(ext)))
}

/// `path` with a recognised compression extension removed (`a.csv.gz` -> `a.csv`).
#[must_use]
pub fn strip_codec_extension(path: &str) -> &str {
    let lower = path.to_ascii_lowercase();
    for codec in registry() {
        for ext in codec.extensions() {
            if lower.ends_with(ext) {
                return &path[..path.len() - ext.len()];
            }
        }
    }
    path
}

fn codec_for_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn CompressionCodec>> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    registry()
        .into_iter()
        .find(|codec| codec.magic_bytes().is_some_and(|magic| buf.starts_with(magic)))
}

/// Wrap `reader` with the decompressor matching `path_hint`, falling back to
/// magic-byte sniffing and finally to the raw stream.
///
/// # Errors
/// Returns [`Error::Format`] if the detected codec cannot initialise.
pub fn auto_detect_reader(
    reader: Box<dyn Read + Send>,
    path_hint: &str,
) -> Result<Box<dyn Read + Send>> {
    if let Some(codec) = codec_for_path(path_hint) {
        return codec
            .wrap_reader(reader)
            .map_err(|e| Error::format(path_hint, format!("{} decoder: {e}", codec.name())));
    }

    let mut buffered = BufReader::new(reader);
    if let Some(codec) = codec_for_magic(&mut buffered) {
        return codec
            .wrap_reader(Box::new(buffered))
            .map_err(|e| Error::format(path_hint, format!("{} decoder: {e}", codec.name())));
    }
    Ok(Box::new(buffered))
}

/// Wrap `sink` with the compressor matching its path extension, if any.
///
/// # Errors
/// Returns an error if the encoder cannot initialise.
pub fn auto_detect_writer(sink: Box<dyn OutputStream>) -> Result<Box<dyn OutputStream>> {
    match codec_for_path(sink.path()) {
        Some(codec) => codec.wrap_writer(sink),
        None => Ok(sink),
    }
}

/// An encoder sitting in front of an [`OutputStream`].
struct EncodedStream<E> {
    path: String,
    encoder: E,
    finish: fn(E) -> std::io::Result<Box<dyn OutputStream>>,
}

impl<E: Write + Send> EncodedStream<E> {
    fn boxed(
        path: String,
        encoder: E,
        finish: fn(E) -> std::io::Result<Box<dyn OutputStream>>,
    ) -> Box<dyn OutputStream>
    where
        E: 'static,
    {
        Box::new(Self {
            path,
            encoder,
            finish,
        })
    }
}

impl<E: Write + Send> Write for EncodedStream<E> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

impl<E: Write + Send> OutputStream for EncodedStream<E> {
    fn path(&self) -> &str {
        &self.path
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self {
            path,
            encoder,
            finish,
        } = *self;
        let inner = finish(encoder).map_err(|e| Error::io(path, e))?;
        inner.close()
    }
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }

    fn wrap_writer(&self, sink: Box<dyn OutputStream>) -> Result<Box<dyn OutputStream>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        let path = sink.path().to_string();
        let encoder = GzEncoder::new(sink, Compression::default());
        Ok(EncodedStream::boxed(path, encoder, GzEncoder::finish))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read + Send>)
    }

    fn wrap_writer(&self, sink: Box<dyn OutputStream>) -> Result<Box<dyn OutputStream>> {
        let path = sink.path().to_string();
        let encoder = zstd::stream::write::Encoder::new(sink, 3)
            .map_err(|e| Error::io(path.clone(), e))?;
        Ok(EncodedStream::boxed(
            path,
            encoder,
            zstd::stream::write::Encoder::finish,
        ))
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extensions(&self) -> &[&str] {
        &[".bz2", ".bzip2"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x42, 0x5a, 0x68])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader)))
    }

    fn wrap_writer(&self, sink: Box<dyn OutputStream>) -> Result<Box<dyn OutputStream>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        let path = sink.path().to_string();
        let encoder = BzEncoder::new(sink, Compression::default());
        Ok(EncodedStream::boxed(path, encoder, BzEncoder::finish))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extensions(&self) -> &[&str] {
        &[".xz"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)))
    }

    fn wrap_writer(&self, sink: Box<dyn OutputStream>) -> Result<Box<dyn OutputStream>> {
        use xz2::write::XzEncoder;
        let path = sink.path().to_string();
        let encoder = XzEncoder::new(sink, 6);
        Ok(EncodedStream::boxed(path, encoder, XzEncoder::finish))
    }
}

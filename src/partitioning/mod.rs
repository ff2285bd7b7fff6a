//! Mapping between directory structure and partition key values.
//!
//! A [`Partitioning`] turns a relative file path into a partition
//! [`Expression`] (reading) and a tuple of key values into a directory path
//! (writing). A [`PartitioningFactory`] infers the key schema from a set of
//! discovered paths before producing the concrete [`Partitioning`].
//!
//! Two schemes are provided:
//! - [`HivePartitioning`] - self-describing `key=value` segments
//! - [`DirectoryPartitioning`] - positional segments mapped onto declared field names

mod directory;
mod hive;

pub use directory::{DirectoryPartitioning, DirectoryPartitioningFactory};
pub use hive::{HIVE_NULL_FALLBACK, HivePartitioning, HivePartitioningFactory};

use crate::error::{Error, Result};
use crate::expression::{Expression, ScalarValue};
use crate::fs::path;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::fmt;
use std::sync::Arc;

/// A concrete path <-> key-values rule with a fixed key schema.
pub trait Partitioning: Send + Sync + fmt::Debug {
    /// Scheme name, e.g. `"hive"`.
    fn type_name(&self) -> &'static str;

    /// Schema of the partition key columns.
    fn schema(&self) -> &SchemaRef;

    /// Partition expression for a path relative to the partition base directory.
    ///
    /// Only directory segments are considered; the file name is ignored. Paths
    /// without recognised segments yield the always-true expression.
    ///
    /// # Errors
    /// [`Error::Invalid`] if a recognised segment's value does not parse as the
    /// key's type.
    fn parse(&self, path: &str) -> Result<Expression>;

    /// Relative directory for one tuple of key values, in schema order.
    ///
    /// # Errors
    /// [`Error::Invalid`] if the tuple does not fit the scheme.
    fn format(&self, values: &[ScalarValue]) -> Result<String>;
}

/// Infers a key schema from paths, then builds a [`Partitioning`].
pub trait PartitioningFactory: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Infer key names and types from relative paths. Reads no files.
    ///
    /// # Errors
    /// Implementation-specific inconsistencies in the path set.
    fn inspect(&self, paths: &[String]) -> Result<SchemaRef>;

    /// Build the partitioning for a (possibly user-adjusted) key schema.
    ///
    /// # Errors
    /// [`Error::Invalid`] if the schema does not suit the scheme.
    fn finish(&self, schema: &SchemaRef) -> Result<Arc<dyn Partitioning>>;
}

/// Either a fixed partitioning or one to infer during discovery.
#[derive(Debug, Clone)]
pub enum PartitioningOrFactory {
    Explicit(Arc<dyn Partitioning>),
    Inferred(Arc<dyn PartitioningFactory>),
}

impl Default for PartitioningOrFactory {
    fn default() -> Self {
        Self::Explicit(Arc::new(NoPartitioning::default()))
    }
}

impl From<Arc<dyn Partitioning>> for PartitioningOrFactory {
    fn from(p: Arc<dyn Partitioning>) -> Self {
        Self::Explicit(p)
    }
}

impl From<Arc<dyn PartitioningFactory>> for PartitioningOrFactory {
    fn from(f: Arc<dyn PartitioningFactory>) -> Self {
        Self::Inferred(f)
    }
}

impl From<HivePartitioning> for PartitioningOrFactory {
    fn from(p: HivePartitioning) -> Self {
        Self::Explicit(Arc::new(p))
    }
}

impl From<DirectoryPartitioning> for PartitioningOrFactory {
    fn from(p: DirectoryPartitioning) -> Self {
        Self::Explicit(Arc::new(p))
    }
}

impl From<HivePartitioningFactory> for PartitioningOrFactory {
    fn from(f: HivePartitioningFactory) -> Self {
        Self::Inferred(Arc::new(f))
    }
}

impl From<DirectoryPartitioningFactory> for PartitioningOrFactory {
    fn from(f: DirectoryPartitioningFactory) -> Self {
        Self::Inferred(Arc::new(f))
    }
}

/// No partition keys: every path parses to `true`, every tuple formats to the base directory.
#[derive(Debug, Clone)]
pub struct NoPartitioning {
    schema: SchemaRef,
}

impl Default for NoPartitioning {
    fn default() -> Self {
        Self {
            schema: Arc::new(Schema::empty()),
        }
    }
}

impl Partitioning for NoPartitioning {
    fn type_name(&self) -> &'static str {
        "default"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse(&self, _path: &str) -> Result<Expression> {
        Ok(Expression::literal(true))
    }

    fn format(&self, values: &[ScalarValue]) -> Result<String> {
        if values.is_empty() {
            Ok(String::new())
        } else {
            Err(Error::invalid("unpartitioned layout cannot format key values"))
        }
    }
}

/// Directory segments of a relative file path.
pub(crate) fn directory_segments(file_path: &str) -> impl Iterator<Item = &str> {
    path::segments(path::parent(file_path))
}

/// `field == value`, or `is_null(field)` for a null value.
pub(crate) fn key_equals(name: &str, value: ScalarValue) -> Expression {
    if value.is_null() {
        crate::expression::is_null(crate::expression::field(name))
    } else {
        crate::expression::field(name).equal(Expression::Literal(value))
    }
}

/// Int64 when every observed value parses as an integer, Utf8 otherwise.
pub(crate) fn infer_key_type<'a>(values: impl IntoIterator<Item = &'a str>) -> DataType {
    let mut any = false;
    for v in values {
        any = true;
        if v.parse::<i64>().is_err() {
            return DataType::Utf8;
        }
    }
    if any { DataType::Int64 } else { DataType::Utf8 }
}

pub(crate) fn key_schema(keys: impl IntoIterator<Item = (String, DataType)>) -> SchemaRef {
    Arc::new(Schema::new(
        keys.into_iter()
            .map(|(name, dt)| Field::new(name, dt, true))
            .collect::<Vec<_>>(),
    ))
}

/// Value rendered for a path segment (strings unquoted).
pub(crate) fn segment_text(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Utf8(s) => escape_segment(s),
        other => escape_segment(&other.to_string()),
    }
}

/// Percent-escape the characters that would break a `key=value` segment.
#[must_use]
pub fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '=' => out.push_str("%3D"),
            other => out.push(other),
        }
    }
    out
}

/// Undo percent-escaping. Malformed escapes are kept verbatim.
#[must_use]
pub fn unescape_segment(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| escaped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_round_trips() {
        let raw = "a/b=c%d";
        let escaped = escape_segment(raw);
        assert_eq!(escaped, "a%2Fb%3Dc%25d");
        assert_eq!(unescape_segment(&escaped), raw);
        assert_eq!(unescape_segment("100%"), "100%");
        assert_eq!(unescape_segment("%zz"), "%zz");
    }

    #[test]
    fn key_types_are_inferred_from_all_values() {
        assert_eq!(infer_key_type(["1", "2"]), DataType::Int64);
        assert_eq!(infer_key_type(["1", "x"]), DataType::Utf8);
        assert_eq!(infer_key_type([]), DataType::Utf8);
    }
}

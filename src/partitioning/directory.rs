//! Positional partitioning: `/2024/eu/part-0.parquet` with fields `[year, region]`.

use super::{
    Partitioning, PartitioningFactory, directory_segments, infer_key_type,
    key_equals, key_schema, segment_text, unescape_segment,
};
use crate::error::{Error, Result};
use crate::expression::{Expression, ScalarValue, conjunction};
use arrow::datatypes::SchemaRef;
use std::sync::Arc;

/// Maps the n-th directory segment onto the n-th schema field.
///
/// Extra segments beyond the schema are ignored; paths with fewer segments
/// constrain only the keys they reach. Null values cannot be represented.
#[derive(Debug, Clone)]
pub struct DirectoryPartitioning {
    schema: SchemaRef,
}

impl DirectoryPartitioning {
    #[must_use]
    pub const fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    /// A factory that infers the types of the named positional keys.
    pub fn factory<S: Into<String>>(
        field_names: impl IntoIterator<Item = S>,
    ) -> DirectoryPartitioningFactory {
        DirectoryPartitioningFactory {
            field_names: field_names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Partitioning for DirectoryPartitioning {
    fn type_name(&self) -> &'static str {
        "directory"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse(&self, path: &str) -> Result<Expression> {
        let terms = self
            .schema
            .fields()
            .iter()
            .zip(directory_segments(path))
            .map(|(f, segment)| {
                let value = ScalarValue::parse(&unescape_segment(segment), f.data_type())
                    .map_err(|e| Error::invalid(format!("in path '{path}': {e}")))?;
                Ok(key_equals(f.name(), value))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(conjunction(terms))
    }

    fn format(&self, values: &[ScalarValue]) -> Result<String> {
        if values.len() != self.schema.fields().len() {
            return Err(Error::invalid(format!(
                "expected {} partition values, got {}",
                self.schema.fields().len(),
                values.len()
            )));
        }
        let mut segments = Vec::with_capacity(values.len());
        for (f, v) in self.schema.fields().iter().zip(values) {
            if v.is_null() {
                return Err(Error::invalid(format!(
                    "directory partitioning cannot encode a null value for '{}'",
                    f.name()
                )));
            }
            let text = segment_text(v);
            if matches!(text.as_str(), "" | "." | "..") {
                return Err(Error::invalid(format!(
                    "directory partitioning cannot encode the value '{text}' for '{}'",
                    f.name()
                )));
            }
            segments.push(text);
        }
        Ok(segments.join("/"))
    }
}

/// Infers positional key types from discovered paths.
#[derive(Debug, Clone)]
pub struct DirectoryPartitioningFactory {
    field_names: Vec<String>,
}

impl PartitioningFactory for DirectoryPartitioningFactory {
    fn type_name(&self) -> &'static str {
        "directory"
    }

    fn inspect(&self, paths: &[String]) -> Result<SchemaRef> {
        let mut observed: Vec<Vec<String>> = vec![Vec::new(); self.field_names.len()];
        for p in paths {
            for (slot, segment) in observed.iter_mut().zip(directory_segments(p)) {
                slot.push(unescape_segment(segment));
            }
        }
        Ok(key_schema(self.field_names.iter().zip(observed).map(
            |(name, values)| (name.clone(), infer_key_type(values.iter().map(String::as_str))),
        )))
    }

    fn finish(&self, schema: &SchemaRef) -> Result<Arc<dyn Partitioning>> {
        Ok(Arc::new(DirectoryPartitioning::new(Arc::clone(schema))))
    }
}

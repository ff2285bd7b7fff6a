//! Hive-style `key=value` partitioning.

use super::{
    Partitioning, PartitioningFactory, directory_segments, infer_key_type, key_equals,
    key_schema, segment_text, unescape_segment,
};
use crate::error::{Error, Result};
use crate::expression::{Expression, ScalarValue, conjunction};
use arrow::datatypes::SchemaRef;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Segment written for, and parsed as, a null key value.
pub const HIVE_NULL_FALLBACK: &str = "__HIVE_DEFAULT_PARTITION__";

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^=]+)=(.*)$").expect("hive segment pattern compiles"));

fn split_segment(segment: &str) -> Option<(String, &str)> {
    let caps = SEGMENT.captures(segment)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str();
    Some((unescape_segment(key), value))
}

/// Partitioning over `{key}={value}` directory segments.
///
/// Segments whose key is not in the schema are ignored, so a layout can carry
/// extra levels without breaking reads.
#[derive(Debug, Clone)]
pub struct HivePartitioning {
    schema: SchemaRef,
    null_fallback: String,
}

impl HivePartitioning {
    #[must_use]
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            null_fallback: HIVE_NULL_FALLBACK.to_string(),
        }
    }

    /// Use a different token for null values.
    #[must_use]
    pub fn with_null_fallback(mut self, token: impl Into<String>) -> Self {
        self.null_fallback = token.into();
        self
    }

    /// A factory that infers the key schema from discovered paths.
    #[must_use]
    pub fn factory() -> HivePartitioningFactory {
        HivePartitioningFactory::default()
    }
}

impl Partitioning for HivePartitioning {
    fn type_name(&self) -> &'static str {
        "hive"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse(&self, path: &str) -> Result<Expression> {
        let mut terms = Vec::new();
        for segment in directory_segments(path) {
            let Some((key, raw)) = split_segment(segment) else {
                continue;
            };
            let Ok(field) = self.schema.field_with_name(&key) else {
                continue;
            };
            let value = if raw == self.null_fallback {
                ScalarValue::Null
            } else {
                ScalarValue::parse(&unescape_segment(raw), field.data_type())
                    .map_err(|e| Error::invalid(format!("in path '{path}': {e}")))?
            };
            terms.push(key_equals(&key, value));
        }
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
            let text = if v.is_null() {
                self.null_fallback.clone()
            } else {
                let text = segment_text(v);
                if text == self.null_fallback {
                    return Err(Error::invalid(format!(
                        "value '{text}' for '{}' is reserved for null keys",
                        f.name()
                    )));
                }
                text
            };
            segments.push(format!("{}={text}", super::escape_segment(f.name())));
        }
        Ok(segments.join("/"))
    }
}

/// Infers hive keys and their types from relative paths.
#[derive(Debug, Clone)]
pub struct HivePartitioningFactory {
    null_fallback: String,
}

impl Default for HivePartitioningFactory {
    fn default() -> Self {
        Self {
            null_fallback: HIVE_NULL_FALLBACK.to_string(),
        }
    }
}

impl HivePartitioningFactory {
    #[must_use]
    pub fn with_null_fallback(mut self, token: impl Into<String>) -> Self {
        self.null_fallback = token.into();
        self
    }
}

impl PartitioningFactory for HivePartitioningFactory {
    fn type_name(&self) -> &'static str {
        "hive"
    }

    fn inspect(&self, paths: &[String]) -> Result<SchemaRef> {
        // key -> (shallowest depth seen, observed non-null values)
        let mut keys: HashMap<String, (usize, Vec<String>)> = HashMap::new();
        for p in paths {
            for (depth, segment) in directory_segments(p).enumerate() {
                let Some((key, raw)) = split_segment(segment) else {
                    continue;
                };
                let entry = keys.entry(key).or_insert((depth, Vec::new()));
                entry.0 = entry.0.min(depth);
                if raw != self.null_fallback {
                    entry.1.push(unescape_segment(raw));
                }
            }
        }

        let mut ordered: Vec<(String, (usize, Vec<String>))> = keys.into_iter().collect();
        ordered.sort_by(|(an, (ad, _)), (bn, (bd, _))| ad.cmp(bd).then_with(|| an.cmp(bn)));
        Ok(key_schema(ordered.into_iter().map(|(name, (_, values))| {
            let dt = infer_key_type(values.iter().map(String::as_str));
            (name, dt)
        })))
    }

    fn finish(&self, schema: &SchemaRef) -> Result<Arc<dyn Partitioning>> {
        Ok(Arc::new(
            HivePartitioning::new(Arc::clone(schema)).with_null_fallback(self.null_fallback.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{field, is_null, lit};
    use arrow::datatypes::{DataType, Field, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("year", DataType::Int64, true),
            Field::new("region", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn parses_known_segments_only() {
        let p = HivePartitioning::new(schema());
        let expr = p.parse("year=2024/extra/region=eu/part-0.parquet").unwrap();
        assert_eq!(
            expr,
            field("year").equal(lit(2024)).and(field("region").equal(lit("eu")))
        );
        assert!(p.parse("plain/file.parquet").unwrap().is_literal_true());
        assert!(p.parse("year=2024.parquet").unwrap().is_literal_true());
    }

    #[test]
    fn null_and_escaped_values() {
        let p = HivePartitioning::new(schema());
        let expr = p
            .parse("year=__HIVE_DEFAULT_PARTITION__/region=a%2Fb/f.csv")
            .unwrap();
        assert_eq!(
            expr,
            is_null(field("year")).and(field("region").equal(lit("a/b")))
        );
        let dir = p
            .format(&[ScalarValue::Null, ScalarValue::Utf8("a/b".into())])
            .unwrap();
        assert_eq!(dir, "year=__HIVE_DEFAULT_PARTITION__/region=a%2Fb");
    }

    #[test]
    fn literal_null_fallback_is_reserved() {
        let p = HivePartitioning::new(schema());
        let err = p
            .format(&[ScalarValue::Int64(1), ScalarValue::Utf8(HIVE_NULL_FALLBACK.into())])
            .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn unparseable_value_is_invalid() {
        let p = HivePartitioning::new(schema());
        assert!(p.parse("year=soon/f.parquet").is_err());
    }

    #[test]
    fn inference_is_order_independent() {
        let f = HivePartitioning::factory();
        let mut paths = vec![
            "year=2023/month=x/a.parquet".to_string(),
            "year=2024/month=11/b.parquet".to_string(),
        ];
        let first = f.inspect(&paths).unwrap();
        paths.reverse();
        let second = f.inspect(&paths).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.field(0).name(), "year");
        assert_eq!(first.field(0).data_type(), &DataType::Int64);
        assert_eq!(first.field(1).data_type(), &DataType::Utf8);
    }
}

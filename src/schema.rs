//! Schema unification across fragments and batch conformance.
//!
//! Physical schemas are merged by column name in first-appearance order. When
//! two files disagree on a column's type the wider type wins if the promotion
//! is lossless in practice:
//!
//! | left | right | result |
//! |---|---|---|
//! | `Null` | any `T` | `T` |
//! | narrower int | wider int, same signedness | wider int |
//! | unsigned int | signed int | smallest signed int holding both |
//! | any int / float | float | `Float64` |
//! | `Utf8` / `LargeUtf8` / `Utf8View` mixed | | `LargeUtf8` |
//!
//! Anything else is a [`SchemaError`](crate::Error::Schema).

use crate::error::{Error, Result};
use crate::expression::ScalarValue;
use arrow::array::{ArrayRef, RecordBatchOptions, new_null_array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn int_width(dt: &DataType) -> Option<(bool, u8)> {
    Some(match dt {
        DataType::Int8 => (true, 8),
        DataType::Int16 => (true, 16),
        DataType::Int32 => (true, 32),
        DataType::Int64 => (true, 64),
        DataType::UInt8 => (false, 8),
        DataType::UInt16 => (false, 16),
        DataType::UInt32 => (false, 32),
        DataType::UInt64 => (false, 64),
        _ => return None,
    })
}

const fn int_type(signed: bool, bits: u8) -> Option<DataType> {
    Some(match (signed, bits) {
        (true, 8) => DataType::Int8,
        (true, 16) => DataType::Int16,
        (true, 32) => DataType::Int32,
        (true, 64) => DataType::Int64,
        (false, 8) => DataType::UInt8,
        (false, 16) => DataType::UInt16,
        (false, 32) => DataType::UInt32,
        (false, 64) => DataType::UInt64,
        _ => return None,
    })
}

const fn is_string(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}

/// The common type two column types promote to, if any.
#[must_use]
pub fn promote(left: &DataType, right: &DataType) -> Option<DataType> {
    if left == right {
        return Some(left.clone());
    }
    match (left, right) {
        (DataType::Null, other) | (other, DataType::Null) => return Some(other.clone()),
        (l, r) if is_string(l) && is_string(r) => return Some(DataType::LargeUtf8),
        (l, r) if (l.is_floating() || l.is_integer()) && (r.is_floating() || r.is_integer()) => {
            if l.is_floating() || r.is_floating() {
                return Some(DataType::Float64);
            }
        }
        _ => return None,
    }

    let (ls, lb) = int_width(left)?;
    let (rs, rb) = int_width(right)?;
    if ls == rs {
        return int_type(ls, lb.max(rb));
    }
    let (unsigned_bits, signed_bits) = if ls { (rb, lb) } else { (lb, rb) };
    if unsigned_bits >= 64 {
        return None;
    }
    int_type(true, (unsigned_bits * 2).max(signed_bits))
}

/// Reject schemas that use a column name twice.
///
/// # Errors
/// [`Error::Schema`] naming the duplicate.
pub fn check_unique_names(schema: &Schema, origin: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for f in schema.fields() {
        if !seen.insert(f.name().as_str()) {
            return Err(Error::schema(format!(
                "duplicate column '{}' in {origin}",
                f.name()
            )));
        }
    }
    Ok(())
}

/// Merge schemas by name, promoting conflicting types.
///
/// A column missing from any input becomes nullable.
///
/// # Errors
/// [`Error::Schema`] when a column's types cannot be reconciled.
pub fn unify_schemas<'a>(schemas: impl IntoIterator<Item = &'a Schema>) -> Result<Schema> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, (DataType, bool, usize)> = HashMap::new();
    let mut inputs = 0usize;

    for schema in schemas {
        inputs += 1;
        for f in schema.fields() {
            match merged.get_mut(f.name()) {
                Some((dt, nullable, seen)) => {
                    let unified = promote(dt, f.data_type()).ok_or_else(|| {
                        Error::schema(format!(
                            "column '{}' has incompatible types {dt} and {}",
                            f.name(),
                            f.data_type()
                        ))
                    })?;
                    *dt = unified;
                    *nullable |= f.is_nullable();
                    *seen += 1;
                }
                None => {
                    order.push(f.name().clone());
                    merged.insert(f.name().clone(), (f.data_type().clone(), f.is_nullable(), 1));
                }
            }
        }
    }

    let fields: Vec<Field> = order
        .into_iter()
        .filter_map(|name| {
            merged
                .remove(&name)
                .map(|(dt, nullable, seen)| Field::new(name, dt, nullable || seen < inputs))
        })
        .collect();
    Ok(Schema::new(fields))
}

/// Append partition key fields after the physical ones.
///
/// A key that is also a physical column is promoted in place.
///
/// # Errors
/// [`Error::Schema`] if the key type conflicts with the physical column.
pub fn with_partition_fields(physical: &Schema, partition: &Schema) -> Result<Schema> {
    let mut fields: Vec<FieldRef> = physical.fields().iter().cloned().collect();
    for key in partition.fields() {
        match fields.iter().position(|f| f.name() == key.name()) {
            Some(i) => {
                let dt = promote(fields[i].data_type(), key.data_type()).ok_or_else(|| {
                    Error::schema(format!(
                        "partition key '{}' ({}) conflicts with physical column type {}",
                        key.name(),
                        key.data_type(),
                        fields[i].data_type()
                    ))
                })?;
                fields[i] = Arc::new(Field::new(key.name(), dt, true));
            }
            None => fields.push(Arc::new(Field::new(key.name(), key.data_type().clone(), true))),
        }
    }
    Ok(Schema::new(fields))
}

/// Sub-schema holding `columns` in the requested order.
///
/// # Errors
/// [`Error::Invalid`] for names not in `schema`.
pub fn project_schema(schema: &SchemaRef, columns: &[String]) -> Result<SchemaRef> {
    let fields = columns
        .iter()
        .map(|name| {
            schema
                .field_with_name(name)
                .map(|f| Arc::new(f.clone()))
                .map_err(|_| Error::invalid(format!("no column named '{name}' in {schema}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

/// Reshape a physical batch into `target`.
///
/// Columns present in the batch are cast to the target type, partition keys in
/// `constants` are materialised, and anything else is filled with nulls.
///
/// # Errors
/// [`Error::Schema`] if a present column cannot be cast.
pub fn conform_batch(
    batch: &RecordBatch,
    target: &SchemaRef,
    constants: &HashMap<String, ScalarValue>,
) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let columns = target
        .fields()
        .iter()
        .map(|f| -> Result<ArrayRef> {
            if let Some(column) = batch.column_by_name(f.name()) {
                if column.data_type() == f.data_type() {
                    return Ok(Arc::clone(column));
                }
                return cast(column, f.data_type()).map_err(|e| {
                    Error::schema(format!(
                        "cannot cast column '{}' from {} to {}: {e}",
                        f.name(),
                        column.data_type(),
                        f.data_type()
                    ))
                });
            }
            match constants.get(f.name()) {
                Some(value) => value.to_array_of_type(f.data_type(), rows),
                None => Ok(new_null_array(f.data_type(), rows)),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    RecordBatch::try_new_with_options(Arc::clone(target), columns, &options)
        .map_err(|e| Error::schema(format!("cannot conform batch to {target}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn promotes_numeric_and_string_types() {
        assert_eq!(promote(&DataType::Int32, &DataType::Int64), Some(DataType::Int64));
        assert_eq!(promote(&DataType::UInt8, &DataType::Int8), Some(DataType::Int16));
        assert_eq!(promote(&DataType::UInt32, &DataType::Int64), Some(DataType::Int64));
        assert_eq!(promote(&DataType::UInt64, &DataType::Int64), None);
        assert_eq!(promote(&DataType::Int64, &DataType::Float32), Some(DataType::Float64));
        assert_eq!(promote(&DataType::Null, &DataType::Utf8), Some(DataType::Utf8));
        assert_eq!(promote(&DataType::Utf8, &DataType::LargeUtf8), Some(DataType::LargeUtf8));
        assert_eq!(promote(&DataType::Int64, &DataType::Utf8), None);
    }

    #[test]
    fn unify_keeps_first_appearance_order() {
        let a = Schema::new(vec![
            Field::new("x", DataType::Int32, false),
            Field::new("y", DataType::Utf8, false),
        ]);
        let b = Schema::new(vec![
            Field::new("z", DataType::Float64, false),
            Field::new("x", DataType::Int64, false),
        ]);
        let unified = unify_schemas([&a, &b]).unwrap();
        let names: Vec<_> = unified.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["x", "y", "z"]);
        assert_eq!(unified.field(0).data_type(), &DataType::Int64);
        assert!(!unified.field(0).is_nullable());
        assert!(unified.field(1).is_nullable());
    }

    #[test]
    fn unify_rejects_int_vs_string() {
        let a = Schema::new(vec![Field::new("x", DataType::Int64, true)]);
        let b = Schema::new(vec![Field::new("x", DataType::Utf8, true)]);
        let err = unify_schemas([&a, &b]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let s = Schema::new(vec![
            Field::new("x", DataType::Int64, true),
            Field::new("x", DataType::Int64, true),
        ]);
        assert_eq!(
            check_unique_names(&s, "test").unwrap_err().kind(),
            ErrorKind::Schema
        );
    }

    #[test]
    fn conform_fills_missing_and_constant_columns() {
        let physical = Arc::new(Schema::new(vec![Field::new("b", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(
            physical,
            vec![Arc::new(arrow::array::Int32Array::from(vec![1, 2]))],
        )
        .unwrap();
        let target = Arc::new(Schema::new(vec![
            Field::new("b", DataType::Int64, true),
            Field::new("c", DataType::Utf8, true),
            Field::new("a", DataType::Int64, true),
        ]));
        let constants = HashMap::from([("a".to_string(), ScalarValue::Int64(7))]);
        let out = conform_batch(&batch, &target, &constants).unwrap();
        assert_eq!(out.num_rows(), 2);
        assert_eq!(out.column(0).data_type(), &DataType::Int64);
        assert_eq!(out.column(1).null_count(), 2);
        assert_eq!(
            ScalarValue::from_array(out.column(2)).unwrap(),
            vec![ScalarValue::Int64(7); 2]
        );
    }
}

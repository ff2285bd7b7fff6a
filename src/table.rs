//! Materialised scan results.

use crate::error::{Error, Result};
use arrow::array::ArrayRef;
use arrow::compute::{concat, concat_batches};
use arrow::datatypes::{FieldRef, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use serde::Serialize;
use serde::de::{Deserialize, DeserializeOwned};
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_arrow::{from_record_batch, to_record_batch};
use std::fmt;
use std::sync::Arc;

/// An ordered list of record batches sharing one schema.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// # Errors
    /// [`Error::Schema`] if a batch's schema differs from `schema`.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        if let Some(bad) = batches.iter().find(|b| b.schema().fields() != schema.fields()) {
            return Err(Error::schema(format!(
                "batch schema {} does not match table schema {schema}",
                bad.schema()
            )));
        }
        Ok(Self { schema, batches })
    }

    #[must_use]
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    /// A table holding a single batch.
    #[must_use]
    pub fn from_batch(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    /// Build a table from serde-serialisable rows, deriving the schema from `T`.
    ///
    /// # Errors
    /// [`Error::Format`] if `T` cannot be mapped onto Arrow types.
    pub fn from_rows<T>(rows: &[T]) -> Result<Self>
    where
        T: Serialize + Deserialize<'static>,
    {
        let fields = Vec::<FieldRef>::from_type::<T>(TracingOptions::default())
            .map_err(|e| Error::format("row type", e))?;
        let batch = to_record_batch(&fields, &rows).map_err(|e| Error::format("rows", e))?;
        Ok(Self::from_batch(batch))
    }

    /// Deserialise every row into `T`.
    ///
    /// # Errors
    /// [`Error::Format`] if a column does not fit the matching field of `T`.
    pub fn to_rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.num_rows());
        for batch in &self.batches {
            let mut rows: Vec<T> =
                from_record_batch(batch).map_err(|e| Error::format("table rows", e))?;
            out.append(&mut rows);
        }
        Ok(out)
    }

    #[must_use]
    pub const fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    #[must_use]
    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Bytes held by the column buffers.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.batches.iter().map(RecordBatch::get_array_memory_size).sum()
    }

    /// One column with all chunks joined.
    ///
    /// # Errors
    /// [`Error::Invalid`] for an unknown name.
    pub fn column(&self, name: &str) -> Result<ArrayRef> {
        let index = self
            .schema
            .index_of(name)
            .map_err(|_| Error::invalid(format!("no column named '{name}'")))?;
        if self.batches.is_empty() {
            return Ok(arrow::array::new_empty_array(self.schema.field(index).data_type()));
        }
        let chunks: Vec<&dyn arrow::array::Array> =
            self.batches.iter().map(|b| b.column(index).as_ref()).collect();
        concat(&chunks).map_err(|e| Error::from_arrow(name, e))
    }

    /// Join every batch into one.
    ///
    /// # Errors
    /// [`Error::Format`] if Arrow cannot concatenate the buffers.
    pub fn concat(&self) -> Result<RecordBatch> {
        concat_batches(&self.schema, &self.batches).map_err(|e| Error::from_arrow("table", e))
    }

    /// Render as an ASCII grid.
    ///
    /// # Errors
    /// [`Error::Format`] if a value cannot be displayed.
    pub fn to_pretty_string(&self) -> Result<String> {
        if self.batches.is_empty() {
            let empty = RecordBatch::new_empty(Arc::clone(&self.schema));
            return pretty_format_batches(&[empty])
                .map(|d| d.to_string())
                .map_err(|e| Error::from_arrow("table", e));
        }
        pretty_format_batches(&self.batches)
            .map(|d| d.to_string())
            .map_err(|e| Error::from_arrow("table", e))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.schema)?;
        match self.to_pretty_string() {
            Ok(grid) => f.write_str(&grid),
            Err(e) => write!(f, "<{e}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        a: i64,
        b: Option<f64>,
    }

    #[test]
    fn rows_round_trip_through_batches() {
        let rows = vec![Row { a: 1, b: Some(0.5) }, Row { a: 2, b: None }];
        let table = Table::from_rows(&rows).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.to_rows::<Row>().unwrap(), rows);
    }

    #[test]
    fn rows_from_a_sub_slice() {
        let rows = [
            Row { a: 1, b: None },
            Row { a: 2, b: Some(1.5) },
            Row { a: 3, b: Some(2.5) },
        ];
        let tail: &[Row] = &rows[1..];
        let table = Table::from_rows(tail).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.to_rows::<Row>().unwrap(), tail);
    }

    #[test]
    fn column_joins_chunks() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
        let batch = |v: Vec<i64>| {
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(v))]).unwrap()
        };
        let table = Table::try_new(schema.clone(), vec![batch(vec![1, 2]), batch(vec![3])]).unwrap();
        let col = table.column("x").unwrap();
        assert_eq!(col.as_primitive::<Int64Type>().values(), &[1, 2, 3]);
        assert!(table.column("y").is_err());
        assert!(table.to_pretty_string().unwrap().contains("| 3 |"));
    }
}

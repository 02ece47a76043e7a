//! In-memory tables.
//!
//! A [`Frame`] wraps an Arrow [`RecordBatch`] and gives the check engine
//! name-based column access, scalar extraction into [`Value`]s, mask
//! filtering and row-wise construction. Query runners return their
//! results as frames too, so both backends hand the engine the same
//! shape of data.

use crate::error::{GuardError, Result};
use crate::value::Value;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::filter_record_batch;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use std::sync::Arc;

/// An immutable in-memory table.
#[derive(Debug, Clone)]
pub struct Frame {
    batch: RecordBatch,
}

impl Frame {
    /// Wraps an existing record batch.
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// The underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column names, in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Returns true when the named column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().column_with_name(name).is_some()
    }

    /// Index of the named column, or a schema error.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.batch
            .schema()
            .column_with_name(name)
            .map(|(idx, _)| idx)
            .ok_or_else(|| GuardError::column_not_found(name))
    }

    /// Scalar value at (column, row).
    pub fn value(&self, column: usize, row: usize) -> Value {
        array_value(self.batch.column(column), row)
    }

    /// Scalar value at (column name, row).
    pub fn value_by_name(&self, name: &str, row: usize) -> Result<Value> {
        let idx = self.column_index(name)?;
        Ok(self.value(idx, row))
    }

    /// One row as a vector of scalars, in schema order.
    pub fn row(&self, row: usize) -> Vec<Value> {
        (0..self.batch.num_columns())
            .map(|c| self.value(c, row))
            .collect()
    }

    /// Keeps the rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Frame> {
        let mask = BooleanArray::from(mask.to_vec());
        let batch = filter_record_batch(&self.batch, &mask)?;
        Ok(Frame::new(batch))
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> Frame {
        let n = n.min(self.batch.num_rows());
        Frame::new(self.batch.slice(0, n))
    }

    /// Projects onto the named columns, keeping their given order.
    pub fn select(&self, columns: &[String]) -> Result<Frame> {
        let indices: Vec<usize> = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<_>>()?;
        let batch = self.batch.project(&indices)?;
        Ok(Frame::new(batch))
    }

    /// Builds a frame from rows, inferring a column type from the values
    /// present (integer, float, boolean, otherwise string). Used for
    /// report output and canned test data.
    pub fn from_rows(columns: &[String], rows: &[Vec<Value>]) -> Result<Frame> {
        let fields: Vec<Field> = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| Field::new(name, infer_type(rows, idx), true))
            .collect();
        let schema = Arc::new(Schema::new(fields.clone()));
        let arrays: Vec<ArrayRef> = fields
            .iter()
            .enumerate()
            .map(|(idx, field)| build_array(field.data_type(), rows, idx))
            .collect();
        let batch = RecordBatch::try_new(schema, arrays)?;
        Ok(Frame::new(batch))
    }
}

fn infer_type(rows: &[Vec<Value>], column: usize) -> DataType {
    let mut saw_int = false;
    let mut saw_float = false;
    let mut saw_bool = false;
    let mut saw_other = false;
    let mut saw_any = false;
    for row in rows {
        match &row[column] {
            Value::Null => continue,
            Value::Int(_) => saw_int = true,
            Value::Float(_) => saw_float = true,
            Value::Bool(_) => saw_bool = true,
            _ => saw_other = true,
        }
        saw_any = true;
    }
    match (saw_any, saw_other, saw_bool, saw_float, saw_int) {
        (false, ..) => DataType::Utf8,
        (true, false, false, false, true) => DataType::Int64,
        (true, false, false, true, _) => DataType::Float64,
        (true, false, true, false, false) => DataType::Boolean,
        _ => DataType::Utf8,
    }
}

fn build_array(data_type: &DataType, rows: &[Vec<Value>], column: usize) -> ArrayRef {
    match data_type {
        DataType::Int64 => {
            let values: Vec<Option<i64>> = rows
                .iter()
                .map(|r| match &r[column] {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect();
            Arc::new(Int64Array::from(values))
        }
        DataType::Float64 => {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|r| r[column].to_float())
                .collect();
            Arc::new(Float64Array::from(values))
        }
        DataType::Boolean => {
            let values: Vec<Option<bool>> = rows
                .iter()
                .map(|r| match &r[column] {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Arc::new(BooleanArray::from(values))
        }
        _ => {
            let values: Vec<Option<String>> =
                rows.iter().map(|r| r[column].string_form()).collect();
            Arc::new(StringArray::from(values))
        }
    }
}

/// Extracts one Arrow array element as a [`Value`]. Unhandled array
/// types degrade to their display string rather than failing the check.
fn array_value(array: &ArrayRef, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Null => Value::Null,
        DataType::Boolean => {
            let a = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            Value::Bool(a.value(row))
        }
        DataType::Int8 => {
            let a = array.as_any().downcast_ref::<Int8Array>().unwrap();
            Value::Int(a.value(row) as i64)
        }
        DataType::Int16 => {
            let a = array.as_any().downcast_ref::<Int16Array>().unwrap();
            Value::Int(a.value(row) as i64)
        }
        DataType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().unwrap();
            Value::Int(a.value(row) as i64)
        }
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            Value::Int(a.value(row))
        }
        DataType::Float32 => {
            let a = array.as_any().downcast_ref::<Float32Array>().unwrap();
            Value::Float(a.value(row) as f64)
        }
        DataType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().unwrap();
            Value::Float(a.value(row))
        }
        DataType::Utf8 => {
            let a = array.as_any().downcast_ref::<StringArray>().unwrap();
            Value::Str(a.value(row).to_string())
        }
        DataType::LargeUtf8 => {
            let a = array.as_any().downcast_ref::<LargeStringArray>().unwrap();
            Value::Str(a.value(row).to_string())
        }
        DataType::Date32 => {
            let a = array.as_any().downcast_ref::<Date32Array>().unwrap();
            match DateTime::from_timestamp(i64::from(a.value(row)) * 86_400, 0) {
                Some(dt) => Value::Timestamp(dt.naive_utc()),
                None => Value::Null,
            }
        }
        DataType::Timestamp(unit, _) => {
            let (secs, nanos) = match unit {
                TimeUnit::Second => {
                    let a = array.as_any().downcast_ref::<TimestampSecondArray>().unwrap();
                    (a.value(row), 0u32)
                }
                TimeUnit::Millisecond => {
                    let a = array
                        .as_any()
                        .downcast_ref::<TimestampMillisecondArray>()
                        .unwrap();
                    let v = a.value(row);
                    (v.div_euclid(1_000), (v.rem_euclid(1_000) * 1_000_000) as u32)
                }
                TimeUnit::Microsecond => {
                    let a = array
                        .as_any()
                        .downcast_ref::<TimestampMicrosecondArray>()
                        .unwrap();
                    let v = a.value(row);
                    (v.div_euclid(1_000_000), (v.rem_euclid(1_000_000) * 1_000) as u32)
                }
                TimeUnit::Nanosecond => {
                    let a = array
                        .as_any()
                        .downcast_ref::<TimestampNanosecondArray>()
                        .unwrap();
                    let v = a.value(row);
                    (v.div_euclid(1_000_000_000), v.rem_euclid(1_000_000_000) as u32)
                }
            };
            match DateTime::from_timestamp(secs, nanos) {
                Some(dt) => Value::Timestamp(dt.naive_utc()),
                None => Value::Null,
            }
        }
        _ => match arrow::util::display::array_value_to_string(array, row) {
            Ok(s) => Value::Str(s),
            Err(_) => Value::Null,
        },
    }
}

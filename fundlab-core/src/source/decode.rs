//! Decoding Postgres result rows into polars columns.
//!
//! Column kinds are resolved once from the prepared statement's metadata;
//! every row is then decoded into a typed buffer per column.

use super::SourceError;
use chrono::NaiveDate;
use polars::prelude::{Column, DataType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Postgres column types the extract knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgKind {
    Float8,
    Float4,
    Numeric,
    Int2,
    Int4,
    Int8,
    Text,
    Date,
    Bool,
}

impl PgKind {
    /// Map a Postgres type name (as reported by the driver) to a kind.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "FLOAT8" | "DOUBLE PRECISION" => Some(PgKind::Float8),
            "FLOAT4" | "REAL" => Some(PgKind::Float4),
            "NUMERIC" => Some(PgKind::Numeric),
            "INT2" | "SMALLINT" => Some(PgKind::Int2),
            "INT4" | "INT" | "INTEGER" => Some(PgKind::Int4),
            "INT8" | "BIGINT" => Some(PgKind::Int8),
            "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER" | "BPCHAR" | "NAME" | "CHARACTER VARYING" => {
                Some(PgKind::Text)
            }
            "DATE" => Some(PgKind::Date),
            "BOOL" | "BOOLEAN" => Some(PgKind::Bool),
            _ => None,
        }
    }

    /// polars type the column materializes as.
    pub fn dtype(self) -> DataType {
        match self {
            PgKind::Float8 | PgKind::Float4 | PgKind::Numeric => DataType::Float64,
            PgKind::Int2 | PgKind::Int4 => DataType::Int32,
            PgKind::Int8 => DataType::Int64,
            PgKind::Text => DataType::String,
            PgKind::Date => DataType::Date,
            PgKind::Bool => DataType::Boolean,
        }
    }
}

/// Days since 1970-01-01, the physical representation of a polars `Date`.
pub fn date_to_epoch_days(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

/// Values of one column, accumulated row by row.
#[derive(Debug)]
pub enum ColumnBuffer {
    Float(Vec<Option<f64>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<i32>>),
    Bool(Vec<Option<bool>>),
}

impl ColumnBuffer {
    pub fn with_capacity(kind: PgKind, capacity: usize) -> Self {
        match kind {
            PgKind::Float8 | PgKind::Float4 | PgKind::Numeric => {
                ColumnBuffer::Float(Vec::with_capacity(capacity))
            }
            PgKind::Int2 | PgKind::Int4 => ColumnBuffer::Int32(Vec::with_capacity(capacity)),
            PgKind::Int8 => ColumnBuffer::Int64(Vec::with_capacity(capacity)),
            PgKind::Text => ColumnBuffer::Text(Vec::with_capacity(capacity)),
            PgKind::Date => ColumnBuffer::Date(Vec::with_capacity(capacity)),
            PgKind::Bool => ColumnBuffer::Bool(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuffer::Float(v) => v.len(),
            ColumnBuffer::Int32(v) => v.len(),
            ColumnBuffer::Int64(v) => v.len(),
            ColumnBuffer::Text(v) => v.len(),
            ColumnBuffer::Date(v) => v.len(),
            ColumnBuffer::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode cell `index` of `row` as `kind` and append it.
    pub fn push_cell(
        &mut self,
        row: &PgRow,
        index: usize,
        kind: PgKind,
        column: &str,
    ) -> Result<(), SourceError> {
        let err = |e: sqlx::Error| SourceError::Decode {
            column: column.to_string(),
            cause: e.to_string(),
        };

        match (self, kind) {
            (ColumnBuffer::Float(v), PgKind::Float8) => {
                v.push(row.try_get::<Option<f64>, _>(index).map_err(err)?)
            }
            (ColumnBuffer::Float(v), PgKind::Float4) => v.push(
                row.try_get::<Option<f32>, _>(index)
                    .map_err(err)?
                    .map(f64::from),
            ),
            (ColumnBuffer::Float(v), PgKind::Numeric) => {
                let value = row.try_get::<Option<Decimal>, _>(index).map_err(err)?;
                v.push(value.and_then(|d| d.to_f64()))
            }
            (ColumnBuffer::Int32(v), PgKind::Int2) => v.push(
                row.try_get::<Option<i16>, _>(index)
                    .map_err(err)?
                    .map(i32::from),
            ),
            (ColumnBuffer::Int32(v), PgKind::Int4) => {
                v.push(row.try_get::<Option<i32>, _>(index).map_err(err)?)
            }
            (ColumnBuffer::Int64(v), PgKind::Int8) => {
                v.push(row.try_get::<Option<i64>, _>(index).map_err(err)?)
            }
            (ColumnBuffer::Text(v), PgKind::Text) => {
                v.push(row.try_get::<Option<String>, _>(index).map_err(err)?)
            }
            (ColumnBuffer::Date(v), PgKind::Date) => v.push(
                row.try_get::<Option<NaiveDate>, _>(index)
                    .map_err(err)?
                    .map(date_to_epoch_days),
            ),
            (ColumnBuffer::Bool(v), PgKind::Bool) => {
                v.push(row.try_get::<Option<bool>, _>(index).map_err(err)?)
            }
            (_, kind) => {
                return Err(SourceError::Decode {
                    column: column.to_string(),
                    cause: format!("buffer does not hold {kind:?} values"),
                })
            }
        }
        Ok(())
    }

    /// Finish the buffer as a named polars column.
    pub fn into_column(self, name: &str) -> Result<Column, SourceError> {
        let column = match self {
            ColumnBuffer::Float(v) => Column::new(name.into(), v),
            ColumnBuffer::Int32(v) => Column::new(name.into(), v),
            ColumnBuffer::Int64(v) => Column::new(name.into(), v),
            ColumnBuffer::Text(v) => Column::new(name.into(), v),
            ColumnBuffer::Bool(v) => Column::new(name.into(), v),
            ColumnBuffer::Date(v) => Column::new(name.into(), v)
                .cast(&DataType::Date)
                .map_err(|e| SourceError::Frame(format!("date cast for '{name}': {e}")))?,
        };
        Ok(column)
    }
}

//! Equality of two materialized tables across storage formats.
//!
//! The dta format cannot represent every polars type, so the comparison
//! allows the coercions the dta writer applies: all numeric and boolean
//! values compare as `f64` (NaN equals null), dates compare by day, and a
//! null string equals the empty string.

use super::ExportError;
use polars::prelude::*;

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn mismatch(msg: String) -> ExportError {
    ExportError::Mismatch(msg)
}

fn polars_err(column: &str) -> impl Fn(PolarsError) -> ExportError + '_ {
    move |e| mismatch(format!("column '{column}': {e}"))
}

fn compare_numeric(name: &str, a: &Series, b: &Series) -> Result<(), ExportError> {
    let a = a.cast(&DataType::Float64).map_err(polars_err(name))?;
    let b = b.cast(&DataType::Float64).map_err(polars_err(name))?;
    let a = a.f64().map_err(polars_err(name))?;
    let b = b.f64().map_err(polars_err(name))?;

    let clean = |v: Option<f64>| v.filter(|x| !x.is_nan());
    for (row, (x, y)) in a.into_iter().zip(b).enumerate() {
        if clean(x) != clean(y) {
            return Err(mismatch(format!(
                "column '{name}' row {row}: {x:?} != {y:?}"
            )));
        }
    }
    Ok(())
}

fn compare_dates(name: &str, a: &Series, b: &Series) -> Result<(), ExportError> {
    let a = a.cast(&DataType::Int32).map_err(polars_err(name))?;
    let b = b.cast(&DataType::Int32).map_err(polars_err(name))?;
    let a = a.i32().map_err(polars_err(name))?;
    let b = b.i32().map_err(polars_err(name))?;

    for (row, (x, y)) in a.into_iter().zip(b).enumerate() {
        if x != y {
            return Err(mismatch(format!(
                "column '{name}' row {row}: day {x:?} != day {y:?}"
            )));
        }
    }
    Ok(())
}

fn compare_strings(name: &str, a: &Series, b: &Series) -> Result<(), ExportError> {
    let a = a.str().map_err(polars_err(name))?;
    let b = b.str().map_err(polars_err(name))?;

    for (row, (x, y)) in a.into_iter().zip(b).enumerate() {
        if x.unwrap_or("") != y.unwrap_or("") {
            return Err(mismatch(format!(
                "column '{name}' row {row}: {x:?} != {y:?}"
            )));
        }
    }
    Ok(())
}

/// Check that `a` and `b` hold the same table, up to format coercions.
pub fn compare_frames(a: &DataFrame, b: &DataFrame) -> Result<(), ExportError> {
    if a.shape() != b.shape() {
        return Err(mismatch(format!(
            "shape {:?} != {:?}",
            a.shape(),
            b.shape()
        )));
    }

    for (ca, cb) in a.get_columns().iter().zip(b.get_columns()) {
        if ca.name() != cb.name() {
            return Err(mismatch(format!(
                "column order differs: '{}' vs '{}'",
                ca.name(),
                cb.name()
            )));
        }
        let name = ca.name().as_str();
        let (sa, sb) = (ca.as_materialized_series(), cb.as_materialized_series());

        match (sa.dtype(), sb.dtype()) {
            (DataType::Date, DataType::Date) => compare_dates(name, sa, sb)?,
            (DataType::String, DataType::String) => compare_strings(name, sa, sb)?,
            (x, y) if is_numeric(x) && is_numeric(y) => compare_numeric(name, sa, sb)?,
            (x, y) => {
                return Err(mismatch(format!(
                    "column '{name}' has incompatible types {x} and {y}"
                )))
            }
        }
    }
    Ok(())
}

use super::*;
use crate::export::{commit_tmp, WrittenFile};
use polars::prelude::*;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A column encoded into its fixed-width data-section bytes.
struct EncodedColumn {
    name: String,
    ty: StataType,
    format: String,
    data: Vec<u8>,
}

fn dta_err(column: &str, e: impl std::fmt::Display) -> ExportError {
    ExportError::Dta(format!("column '{column}': {e}"))
}

fn encode_f64(values: &Float64Chunked) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * 8);
    for v in values {
        let bits = match v {
            Some(v) if !v.is_nan() => v.to_bits(),
            _ => MISSING_DOUBLE,
        };
        data.extend_from_slice(&bits.to_le_bytes());
    }
    data
}

fn encode_f32(values: &Float32Chunked) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * 4);
    for v in values {
        let bits = match v {
            Some(v) if !v.is_nan() => v.to_bits(),
            _ => MISSING_FLOAT,
        };
        data.extend_from_slice(&bits.to_le_bytes());
    }
    data
}

fn encode_i32(values: &Int32Chunked, shift: i32, column: &str) -> Result<Vec<u8>, ExportError> {
    let mut data = Vec::with_capacity(values.len() * 4);
    for v in values {
        let v = match v {
            Some(v) => v
                .checked_add(shift)
                .filter(|v| (-MAX_LONG..=MAX_LONG).contains(v))
                .ok_or_else(|| dta_err(column, format!("value {v} out of range")))?,
            None => MISSING_LONG,
        };
        data.extend_from_slice(&v.to_le_bytes());
    }
    Ok(data)
}

fn encode_bool(values: &BooleanChunked) -> Vec<u8> {
    values
        .into_iter()
        .map(|v| match v {
            Some(true) => 1u8,
            Some(false) => 0u8,
            None => MISSING_BYTE as u8,
        })
        .collect()
}

fn encode_str(values: &StringChunked, column: &str) -> Result<(StataType, Vec<u8>), ExportError> {
    let width = values
        .into_iter()
        .map(|v| v.map_or(0, str::len))
        .max()
        .unwrap_or(0)
        .max(1);
    if width > MAX_STR_WIDTH {
        return Err(ExportError::StringTooWide {
            column: column.to_string(),
            width,
            max: MAX_STR_WIDTH,
        });
    }

    let mut data = vec![0u8; values.len() * width];
    for (row, v) in values.into_iter().enumerate() {
        if let Some(s) = v {
            let start = row * width;
            data[start..start + s.len()].copy_from_slice(s.as_bytes());
        }
    }
    Ok((StataType::Str(width as u16), data))
}

/// Whether every value of an Int32 column fits a Stata `long`.
fn fits_long(values: &Int32Chunked) -> bool {
    values
        .into_iter()
        .flatten()
        .all(|v| (-MAX_LONG..=MAX_LONG).contains(&v))
}

fn encode_column(column: &Column) -> Result<EncodedColumn, ExportError> {
    let name = column.name().to_string();
    validate_variable_name(&name)?;
    let series = column.as_materialized_series();
    let err = |e: PolarsError| dta_err(&name, e);

    let (ty, format, data) = match series.dtype() {
        DataType::Float64 => {
            let data = encode_f64(series.f64().map_err(err)?);
            (StataType::Double, StataType::Double.default_format(), data)
        }
        DataType::Float32 => {
            let data = encode_f32(series.f32().map_err(err)?);
            (StataType::Float, StataType::Float.default_format(), data)
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::UInt8 | DataType::UInt16 => {
            let cast = series.cast(&DataType::Int32).map_err(err)?;
            let values = cast.i32().map_err(err)?;
            if fits_long(values) {
                let data = encode_i32(values, 0, &name)?;
                (StataType::Long, StataType::Long.default_format(), data)
            } else {
                let wide = cast.cast(&DataType::Float64).map_err(err)?;
                let data = encode_f64(wide.f64().map_err(err)?);
                (StataType::Double, StataType::Double.default_format(), data)
            }
        }
        // No 64-bit integer storage type exists; values above 2^53 lose precision.
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => {
            let wide = series.cast(&DataType::Float64).map_err(err)?;
            let data = encode_f64(wide.f64().map_err(err)?);
            (StataType::Double, StataType::Double.default_format(), data)
        }
        DataType::Boolean => {
            let data = encode_bool(series.bool().map_err(err)?);
            (StataType::Byte, StataType::Byte.default_format(), data)
        }
        DataType::Date => {
            let days = series.cast(&DataType::Int32).map_err(err)?;
            let data = encode_i32(days.i32().map_err(err)?, STATA_EPOCH_OFFSET_DAYS, &name)?;
            (StataType::Long, "%td".to_string(), data)
        }
        DataType::String => {
            let (ty, data) = encode_str(series.str().map_err(err)?, &name)?;
            (ty, ty.default_format(), data)
        }
        other => {
            return Err(dta_err(&name, format!("unsupported type {other}")));
        }
    };

    Ok(EncodedColumn {
        name,
        ty,
        format,
        data,
    })
}

/// Append `value` NUL-padded to exactly `width` bytes.
fn push_fixed(buf: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(width - 1);
    buf.extend_from_slice(&bytes[..n]);
    buf.resize(buf.len() + width - n, 0);
}

fn tagged(buf: &mut Vec<u8>, tag: &str, body: impl FnOnce(&mut Vec<u8>)) {
    buf.extend_from_slice(format!("<{tag}>").as_bytes());
    body(buf);
    buf.extend_from_slice(format!("</{tag}>").as_bytes());
}

/// Serialize `df` as a dta 118 file into `out`.
pub fn encode_dta<W: Write>(df: &DataFrame, label: &str, out: W) -> Result<(), ExportError> {
    if df.width() > MAX_VARIABLES {
        return Err(ExportError::Dta(format!(
            "{} columns exceed the {MAX_VARIABLES}-variable limit",
            df.width()
        )));
    }
    if label.len() > MAX_LABEL_BYTES {
        return Err(ExportError::Dta(format!(
            "dataset label is {} bytes, at most {MAX_LABEL_BYTES} allowed",
            label.len()
        )));
    }

    let columns = df
        .get_columns()
        .iter()
        .map(encode_column)
        .collect::<Result<Vec<_>, _>>()?;
    let nobs = df.height();
    let row_width: usize = columns.iter().map(|c| c.ty.width()).sum();

    let mut offsets = [0u64; MAP_ENTRIES];
    let mut buf = Vec::new();
    buf.extend_from_slice(b"<stata_dta>");
    tagged(&mut buf, "header", |b| {
        tagged(b, "release", |b| b.extend_from_slice(RELEASE));
        tagged(b, "byteorder", |b| b.extend_from_slice(b"LSF"));
        tagged(b, "K", |b| b.extend_from_slice(&(columns.len() as u16).to_le_bytes()));
        tagged(b, "N", |b| b.extend_from_slice(&(nobs as u64).to_le_bytes()));
        tagged(b, "label", |b| {
            b.extend_from_slice(&(label.len() as u16).to_le_bytes());
            b.extend_from_slice(label.as_bytes());
        });
        // Zero-length timestamp.
        tagged(b, "timestamp", |b| b.push(0));
    });

    offsets[1] = buf.len() as u64;
    let map_start = buf.len() + "<map>".len();
    tagged(&mut buf, "map", |b| b.resize(b.len() + MAP_ENTRIES * 8, 0));

    offsets[2] = buf.len() as u64;
    tagged(&mut buf, "variable_types", |b| {
        for c in &columns {
            b.extend_from_slice(&c.ty.code().to_le_bytes());
        }
    });
    offsets[3] = buf.len() as u64;
    tagged(&mut buf, "varnames", |b| {
        for c in &columns {
            push_fixed(b, &c.name, VARNAME_FIELD);
        }
    });
    offsets[4] = buf.len() as u64;
    tagged(&mut buf, "sortlist", |b| {
        b.resize(b.len() + (columns.len() + 1) * 2, 0);
    });
    offsets[5] = buf.len() as u64;
    tagged(&mut buf, "formats", |b| {
        for c in &columns {
            push_fixed(b, &c.format, FORMAT_FIELD);
        }
    });
    offsets[6] = buf.len() as u64;
    tagged(&mut buf, "value_label_names", |b| {
        b.resize(b.len() + columns.len() * VALUE_LABEL_FIELD, 0);
    });
    offsets[7] = buf.len() as u64;
    tagged(&mut buf, "variable_labels", |b| {
        b.resize(b.len() + columns.len() * VARIABLE_LABEL_FIELD, 0);
    });
    offsets[8] = buf.len() as u64;
    tagged(&mut buf, "characteristics", |_| {});
    offsets[9] = buf.len() as u64;
    buf.extend_from_slice(b"<data>");

    let mut tail = Vec::new();
    tail.extend_from_slice(b"</data>");
    let tail_base = buf.len() + nobs * row_width;
    offsets[10] = (tail_base + tail.len()) as u64;
    tagged(&mut tail, "strls", |_| {});
    offsets[11] = (tail_base + tail.len()) as u64;
    tagged(&mut tail, "value_labels", |_| {});
    offsets[12] = (tail_base + tail.len()) as u64;
    tail.extend_from_slice(b"</stata_dta>");
    offsets[13] = (tail_base + tail.len()) as u64;

    for (i, offset) in offsets.iter().enumerate() {
        let at = map_start + i * 8;
        buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
    }

    let mut out = BufWriter::new(out);
    let io_err = |e: std::io::Error| ExportError::Dta(format!("write failed: {e}"));
    out.write_all(&buf).map_err(io_err)?;
    for row in 0..nobs {
        for c in &columns {
            let w = c.ty.width();
            out.write_all(&c.data[row * w..(row + 1) * w])
                .map_err(io_err)?;
        }
    }
    out.write_all(&tail).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(())
}

/// Write `df` to `path` as dta 118, atomically via `{path}.tmp`.
pub fn write_dta(df: &DataFrame, path: &Path, label: &str) -> Result<WrittenFile, ExportError> {
    let tmp_path = path.with_extension("dta.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| ExportError::io(&tmp_path, e))?;
    if let Err(e) = encode_dta(df, label, file) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    commit_tmp(&tmp_path, path)?;
    WrittenFile::stat(path.to_path_buf())
}

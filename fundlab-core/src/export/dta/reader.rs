use super::*;
use polars::prelude::*;
use std::path::Path;

/// A decoded dta file.
#[derive(Debug, Clone)]
pub struct DtaContents {
    pub label: String,
    pub frame: DataFrame,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ExportError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ExportError::Dta(format!(
                "unexpected end of file at byte {} (wanted {n} more)",
                self.pos
            ))),
        }
    }

    fn consume(&mut self, tag: &str) -> Result<(), ExportError> {
        let at = self.pos;
        if self.take(tag.len())? != tag.as_bytes() {
            return Err(ExportError::Dta(format!("expected {tag} at byte {at}")));
        }
        Ok(())
    }

    fn peek_is(&self, tag: &str) -> bool {
        self.bytes[self.pos..].starts_with(tag.as_bytes())
    }

    fn u8(&mut self) -> Result<u8, ExportError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ExportError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ExportError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ExportError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

/// Text up to the first NUL.
fn c_str(bytes: &[u8]) -> Result<String, ExportError> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(str::to_string)
        .map_err(|e| ExportError::Dta(format!("invalid UTF-8 text: {e}")))
}

fn fixed_fields(cur: &mut Cursor<'_>, tag: &str, k: usize, width: usize) -> Result<Vec<String>, ExportError> {
    cur.consume(&format!("<{tag}>"))?;
    let fields = (0..k)
        .map(|_| c_str(cur.take(width)?))
        .collect::<Result<Vec<_>, _>>()?;
    cur.consume(&format!("</{tag}>"))?;
    Ok(fields)
}

/// Values of one variable, decoded row by row.
enum Values {
    Float(Vec<Option<f64>>),
    Int(Vec<Option<i32>>),
    Date(Vec<Option<i32>>),
    Text(Vec<Option<String>>),
}

impl Values {
    fn new(ty: StataType, format: &str, n: usize) -> Self {
        match ty {
            StataType::Double | StataType::Float => Values::Float(Vec::with_capacity(n)),
            StataType::Long if format.starts_with("%td") => Values::Date(Vec::with_capacity(n)),
            StataType::Long | StataType::Int | StataType::Byte => Values::Int(Vec::with_capacity(n)),
            StataType::Str(_) => Values::Text(Vec::with_capacity(n)),
        }
    }

    fn push(&mut self, ty: StataType, raw: &[u8]) -> Result<(), ExportError> {
        match (self, ty) {
            (Values::Float(v), StataType::Double) => {
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                let x = f64::from_le_bytes(b);
                v.push((x < f64::from_bits(MISSING_DOUBLE)).then_some(x));
            }
            (Values::Float(v), StataType::Float) => {
                let x = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                v.push((x < f32::from_bits(MISSING_FLOAT)).then_some(f64::from(x)));
            }
            (Values::Int(v), StataType::Long) => {
                let x = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                v.push((x <= MAX_LONG).then_some(x));
            }
            (Values::Date(v), StataType::Long) => {
                let x = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                v.push((x <= MAX_LONG).then(|| x - STATA_EPOCH_OFFSET_DAYS));
            }
            (Values::Int(v), StataType::Int) => {
                let x = i16::from_le_bytes([raw[0], raw[1]]);
                v.push((x <= MAX_INT).then_some(i32::from(x)));
            }
            (Values::Int(v), StataType::Byte) => {
                let x = raw[0] as i8;
                v.push((x <= MAX_BYTE).then_some(i32::from(x)));
            }
            (Values::Text(v), StataType::Str(_)) => v.push(Some(c_str(raw)?)),
            (_, ty) => return Err(ExportError::Dta(format!("buffer mismatch for {ty:?}"))),
        }
        Ok(())
    }

    fn into_column(self, name: &str) -> Result<Column, ExportError> {
        Ok(match self {
            Values::Float(v) => Column::new(name.into(), v),
            Values::Int(v) => Column::new(name.into(), v),
            Values::Text(v) => Column::new(name.into(), v),
            Values::Date(v) => Column::new(name.into(), v)
                .cast(&DataType::Date)
                .map_err(|e| ExportError::Dta(format!("date column '{name}': {e}")))?,
        })
    }
}

/// Decode an in-memory dta 118 file.
pub fn decode_dta(bytes: &[u8]) -> Result<DtaContents, ExportError> {
    let mut cur = Cursor::new(bytes);
    cur.consume("<stata_dta><header><release>")?;
    let release = cur.take(3)?;
    if release != RELEASE {
        return Err(ExportError::Dta(format!(
            "unsupported dta release {}",
            String::from_utf8_lossy(release)
        )));
    }
    cur.consume("</release><byteorder>")?;
    if cur.take(3)? != b"LSF" {
        return Err(ExportError::Dta("only little-endian (LSF) files are supported".into()));
    }
    cur.consume("</byteorder><K>")?;
    let k = cur.u16()? as usize;
    cur.consume("</K><N>")?;
    let n = usize::try_from(cur.u64()?)
        .map_err(|_| ExportError::Dta("observation count does not fit in memory".into()))?;
    cur.consume("</N><label>")?;
    let label_len = cur.u16()? as usize;
    let label = c_str(cur.take(label_len)?)?;
    cur.consume("</label><timestamp>")?;
    let ts_len = cur.u8()? as usize;
    cur.take(ts_len)?;
    cur.consume("</timestamp></header>")?;

    cur.consume("<map>")?;
    let map = (0..MAP_ENTRIES)
        .map(|_| cur.u64())
        .collect::<Result<Vec<_>, _>>()?;
    cur.consume("</map>")?;
    // The last map entry is the file length.
    let declared_len = map[MAP_ENTRIES - 1];
    if declared_len != bytes.len() as u64 {
        return Err(ExportError::Dta(format!(
            "file is {} bytes but its map declares {declared_len}",
            bytes.len()
        )));
    }

    cur.consume("<variable_types>")?;
    let types = (0..k)
        .map(|i| {
            let code = cur.u16()?;
            StataType::from_code(code).ok_or_else(|| {
                ExportError::Dta(format!("variable {i} has unsupported type code {code}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    cur.consume("</variable_types>")?;

    let names = fixed_fields(&mut cur, "varnames", k, VARNAME_FIELD)?;
    cur.consume("<sortlist>")?;
    cur.take((k + 1) * 2)?;
    cur.consume("</sortlist>")?;
    let formats = fixed_fields(&mut cur, "formats", k, FORMAT_FIELD)?;
    fixed_fields(&mut cur, "value_label_names", k, VALUE_LABEL_FIELD)?;
    fixed_fields(&mut cur, "variable_labels", k, VARIABLE_LABEL_FIELD)?;

    cur.consume("<characteristics>")?;
    while cur.peek_is("<ch>") {
        cur.consume("<ch>")?;
        let len = cur.u32()? as usize;
        cur.take(len)?;
        cur.consume("</ch>")?;
    }
    cur.consume("</characteristics>")?;

    cur.consume("<data>")?;
    let mut values: Vec<Values> = types
        .iter()
        .zip(&formats)
        .map(|(ty, format)| Values::new(*ty, format, n))
        .collect();
    for _ in 0..n {
        for (ty, v) in types.iter().zip(values.iter_mut()) {
            v.push(*ty, cur.take(ty.width())?)?;
        }
    }
    cur.consume("</data>")?;

    cur.consume("<strls>")?;
    if cur.peek_is("GSO") {
        return Err(ExportError::Dta("strL values are not supported".into()));
    }
    cur.consume("</strls>")?;
    cur.consume("<value_labels>")?;
    while cur.peek_is("<lbl>") {
        cur.consume("<lbl>")?;
        let len = cur.u32()? as usize;
        // Label name plus three bytes of padding.
        cur.take(VALUE_LABEL_FIELD + 3)?;
        cur.take(len)?;
        cur.consume("</lbl>")?;
    }
    cur.consume("</value_labels>")?;
    cur.consume("</stata_dta>")?;
    if cur.pos != bytes.len() {
        return Err(ExportError::Dta(format!(
            "{} trailing bytes after </stata_dta>",
            bytes.len() - cur.pos
        )));
    }

    let columns = names
        .iter()
        .zip(values)
        .map(|(name, v)| v.into_column(name))
        .collect::<Result<Vec<_>, _>>()?;
    let frame = DataFrame::new(columns).map_err(|e| ExportError::Dta(e.to_string()))?;
    Ok(DtaContents { label, frame })
}

/// Read a dta 118 file into a DataFrame.
pub fn read_dta(path: &Path) -> Result<DataFrame, ExportError> {
    let bytes = std::fs::read(path).map_err(|e| ExportError::io(path, e))?;
    Ok(decode_dta(&bytes)?.frame)
}

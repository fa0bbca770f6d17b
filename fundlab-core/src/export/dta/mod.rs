//! Stata dta, release 118.
//!
//! Only the subset the extract needs: little-endian, fixed-width `strN`
//! columns (no `strL`), no value labels, no characteristics. Files written
//! here carry an empty timestamp so identical frames give identical bytes.

mod reader;
mod writer;

pub use reader::{decode_dta, read_dta, DtaContents};
pub use writer::{encode_dta, write_dta};

use super::ExportError;

pub const RELEASE: &[u8; 3] = b"118";
pub const MAX_STR_WIDTH: usize = 2045;
pub const MAX_VARIABLES: usize = 32_767;
pub const MAX_NAME_LEN: usize = 32;
/// Dataset labels hold 80 characters of up to four UTF-8 bytes each.
pub const MAX_LABEL_BYTES: usize = 320;

/// Days between 1960-01-01 (Stata `%td` zero) and 1970-01-01.
pub const STATA_EPOCH_OFFSET_DAYS: i32 = 3653;

pub(crate) const MAP_ENTRIES: usize = 14;
pub(crate) const VARNAME_FIELD: usize = 129;
pub(crate) const FORMAT_FIELD: usize = 57;
pub(crate) const VALUE_LABEL_FIELD: usize = 129;
pub(crate) const VARIABLE_LABEL_FIELD: usize = 321;

// System missing `.` per storage type, and the largest non-missing values.
pub const MISSING_DOUBLE: u64 = 0x7FE0_0000_0000_0000;
pub const MISSING_FLOAT: u32 = 0x7F00_0000;
pub const MISSING_LONG: i32 = 2_147_483_621;
pub const MAX_LONG: i32 = 2_147_483_620;
pub const MISSING_INT: i16 = 32_741;
pub const MAX_INT: i16 = 32_740;
pub const MISSING_BYTE: i8 = 101;
pub const MAX_BYTE: i8 = 100;

/// Storage type of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StataType {
    Str(u16),
    Double,
    Float,
    Long,
    Int,
    Byte,
}

impl StataType {
    pub fn code(self) -> u16 {
        match self {
            StataType::Str(n) => n,
            StataType::Double => 65526,
            StataType::Float => 65527,
            StataType::Long => 65528,
            StataType::Int => 65529,
            StataType::Byte => 65530,
        }
    }

    /// `None` for `strL` (32768) and unknown codes.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1..=2045 => Some(StataType::Str(code)),
            65526 => Some(StataType::Double),
            65527 => Some(StataType::Float),
            65528 => Some(StataType::Long),
            65529 => Some(StataType::Int),
            65530 => Some(StataType::Byte),
            _ => None,
        }
    }

    /// Bytes per value in the data section.
    pub fn width(self) -> usize {
        match self {
            StataType::Str(n) => n as usize,
            StataType::Double => 8,
            StataType::Float | StataType::Long => 4,
            StataType::Int => 2,
            StataType::Byte => 1,
        }
    }

    pub fn default_format(self) -> String {
        match self {
            StataType::Str(n) => format!("%{n}s"),
            StataType::Double => "%10.0g".to_string(),
            StataType::Float => "%9.0g".to_string(),
            StataType::Long => "%12.0g".to_string(),
            StataType::Int | StataType::Byte => "%8.0g".to_string(),
        }
    }
}

const RESERVED_NAMES: &[&str] = &[
    "_all", "_b", "byte", "_coef", "_cons", "double", "float", "if", "in", "int", "long", "_n",
    "_N", "_pi", "_pred", "_rc", "_skip", "strL", "using", "with",
];

/// Check `name` against Stata's variable naming rules.
pub fn validate_variable_name(name: &str) -> Result<(), ExportError> {
    let invalid = |reason| ExportError::InvalidVariableName {
        name: name.to_string(),
        reason,
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("empty")),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(_) => return Err(invalid("must start with a letter or underscore")),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only letters, digits and underscores are allowed"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 32 characters"));
    }
    let is_str_type = name
        .strip_prefix("str")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
    if RESERVED_NAMES.contains(&name) || is_str_type {
        return Err(invalid("reserved word"));
    }
    Ok(())
}

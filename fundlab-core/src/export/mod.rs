//! Writing the materialized extract to disk.
//!
//! Two independent artifacts are produced from the same frame:
//! - `{base_dir}/{parquet_file}`: ZSTD-compressed Parquet
//! - `{base_dir}/{dta_file}`: Stata dta release 118
//!
//! Both writes go to a `.tmp` sibling first and are renamed into place, so a
//! rerun overwrites cleanly and a crash never leaves a half-written file
//! under the final name.

pub mod compare;
pub mod dta;
pub mod parquet;

pub use compare::compare_frames;
pub use dta::{read_dta, write_dta};
pub use parquet::{read_parquet, write_parquet};

use crate::config::ExportConfig;
use polars::prelude::DataFrame;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Structured errors from the exporters.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {cause}")]
    Io { path: PathBuf, cause: String },

    #[error("parquet error on {path}: {cause}")]
    Parquet { path: PathBuf, cause: String },

    #[error("dta error: {0}")]
    Dta(String),

    #[error("'{name}' is not a valid Stata variable name: {reason}")]
    InvalidVariableName { name: String, reason: &'static str },

    #[error("column '{column}' holds a {width}-byte string; dta str columns hold at most {max}")]
    StringTooWide {
        column: String,
        width: usize,
        max: usize,
    },

    #[error("exported tables differ: {0}")]
    Mismatch(String),
}

impl ExportError {
    pub(crate) fn io(path: &Path, e: std::io::Error) -> Self {
        ExportError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        }
    }
}

/// One file written by the exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub bytes: u64,
}

impl WrittenFile {
    pub(crate) fn stat(path: PathBuf) -> Result<Self, ExportError> {
        let bytes = fs::metadata(&path)
            .map_err(|e| ExportError::io(&path, e))?
            .len();
        Ok(Self { path, bytes })
    }
}

/// Outcome of one export run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub rows: usize,
    pub columns: usize,
    pub parquet: WrittenFile,
    pub dta: WrittenFile,
}

/// Rename `tmp` over `path`, removing `tmp` if the rename fails.
pub(crate) fn commit_tmp(tmp: &Path, path: &Path) -> Result<(), ExportError> {
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        ExportError::io(path, e)
    })
}

/// Write `df` unmodified to both output formats under `base_dir`.
pub fn export_frame(
    df: &DataFrame,
    cfg: &ExportConfig,
    base_dir: &Path,
) -> Result<ExportReport, ExportError> {
    fs::create_dir_all(base_dir).map_err(|e| ExportError::io(base_dir, e))?;

    let started = Instant::now();
    let parquet_path = cfg.parquet_path(base_dir);
    let parquet = write_parquet(df, &parquet_path, cfg.zstd_level)?;
    info!(
        path = %parquet.path.display(),
        bytes = parquet.bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "parquet written"
    );

    let started = Instant::now();
    let dta_path = cfg.dta_path(base_dir);
    let dta = write_dta(df, &dta_path, &cfg.dta_label)?;
    info!(
        path = %dta.path.display(),
        bytes = dta.bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dta written"
    );

    Ok(ExportReport {
        rows: df.height(),
        columns: df.width(),
        parquet,
        dta,
    })
}

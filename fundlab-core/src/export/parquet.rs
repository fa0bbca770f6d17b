//! Parquet I/O.

use super::{commit_tmp, ExportError, WrittenFile};
use polars::prelude::*;
use std::fs;
use std::path::Path;

fn parquet_err(path: &Path, e: impl std::fmt::Display) -> ExportError {
    ExportError::Parquet {
        path: path.to_path_buf(),
        cause: e.to_string(),
    }
}

/// Write `df` as ZSTD-compressed Parquet with column statistics.
///
/// Atomic: writes to `{path}.tmp` and renames into place.
pub fn write_parquet(df: &DataFrame, path: &Path, zstd_level: i32) -> Result<WrittenFile, ExportError> {
    let level = ZstdLevel::try_new(zstd_level).map_err(|e| parquet_err(path, e))?;
    let tmp_path = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp_path).map_err(|e| ExportError::io(&tmp_path, e))?;
    let written = ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(Some(level)))
        .with_statistics(StatisticsOptions::default())
        .finish(&mut df.clone());
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(parquet_err(path, e));
    }

    commit_tmp(&tmp_path, path)?;
    WrittenFile::stat(path.to_path_buf())
}

/// Read a Parquet file into memory.
pub fn read_parquet(path: &Path) -> Result<DataFrame, ExportError> {
    let file = fs::File::open(path).map_err(|e| ExportError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| parquet_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        let dates = Column::new("datadate".into(), [11077i32, 11016])
            .cast(&DataType::Date)
            .unwrap();
        let mut df = df!(
            "gvkey" => ["001690", "001690"],
            "sale" => [Some(10.5), None],
        )
        .unwrap();
        df.with_column(dates).unwrap();
        df
    }

    #[test]
    fn write_then_read_preserves_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let df = sample();

        let written = write_parquet(&df, &path, 19).unwrap();
        assert_eq!(written.path, path);
        assert!(written.bytes > 0);

        let back = read_parquet(&path).unwrap();
        assert!(back.equals_missing(&df));
        assert_eq!(back.column("datadate").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn rewrite_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        write_parquet(&sample(), &path, 19).unwrap();
        let first = fs::read(&path).unwrap();
        write_parquet(&sample(), &path, 19).unwrap();
        assert_eq!(first, fs::read(&path).unwrap());
    }

    #[test]
    fn bad_level_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let err = write_parquet(&sample(), &path, 99).unwrap_err();
        assert!(matches!(err, ExportError::Parquet { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_parquet(Path::new("/nonexistent/x.parquet")).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }
}

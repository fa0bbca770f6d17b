//! Both exporters against a frame shaped like the extract output.
//!
//! Tests:
//! 1. Parquet and dta read back to the same table (format coercions allowed)
//! 2. Exporting twice yields byte-identical files
//! 3. Types the dta format lacks are coerced, not lost
//! 4. Failures surface as structured errors

use fundlab_core::config::ExportConfig;
use fundlab_core::export::{compare_frames, export_frame, read_dta, read_parquet, ExportError};
use polars::prelude::*;
use std::fs;

fn extract_like() -> DataFrame {
    let datadate = Column::new("datadate".into(), [Some(11077i32), Some(11016), None])
        .cast(&DataType::Date)
        .unwrap();
    let mut df = df!(
        "gvkey" => ["001690", "001690", "012141"],
        "fyear" => [Some(2000i32), Some(1999), None],
        "ticker" => [Some("AAPL"), None, Some("MSFT")],
        "at" => [Some(1234.5), None, Some(f64::NAN)],
        "xrd" => [0.0, 12.0, 0.0],
        "sic4" => [Some(3571i32), Some(3571), None],
        "sic2" => [Some(35i32), Some(35), None],
        "calyear" => [2001i32, 2000, 2002],
        "mve" => [Some(5.0e9), Some(-0.25), None],
    )
    .unwrap();
    df.with_column(datadate).unwrap();
    df
}

#[test]
fn parquet_and_dta_hold_the_same_table() {
    let dir = tempfile::tempdir().unwrap();
    let df = extract_like();
    let report = export_frame(&df, &ExportConfig::default(), dir.path()).unwrap();

    let parquet = read_parquet(&report.parquet.path).unwrap();
    let dta = read_dta(&report.dta.path).unwrap();
    assert_eq!(parquet.shape(), df.shape());
    assert_eq!(dta.shape(), df.shape());
    compare_frames(&parquet, &dta).unwrap();
    compare_frames(&df, &dta).unwrap();
}

#[test]
fn exporting_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ExportConfig::default();
    let df = extract_like();

    let first = export_frame(&df, &cfg, dir.path()).unwrap();
    let parquet_1 = fs::read(&first.parquet.path).unwrap();
    let dta_1 = fs::read(&first.dta.path).unwrap();

    let second = export_frame(&df, &cfg, dir.path()).unwrap();
    assert_eq!(parquet_1, fs::read(&second.parquet.path).unwrap());
    assert_eq!(dta_1, fs::read(&second.dta.path).unwrap());
}

#[test]
fn dta_coerces_types_it_cannot_store() {
    let dir = tempfile::tempdir().unwrap();
    let df = df!(
        "big" => [Some(9_007_199_254_740_992i64), None],
        "flag" => [Some(true), Some(false)],
        "small" => [Some(1.5f32), None],
    )
    .unwrap();
    let report = export_frame(&df, &ExportConfig::default(), dir.path()).unwrap();
    let dta = read_dta(&report.dta.path).unwrap();

    assert_eq!(dta.column("big").unwrap().dtype(), &DataType::Float64);
    assert_eq!(dta.column("flag").unwrap().dtype(), &DataType::Int32);
    assert_eq!(dta.column("small").unwrap().dtype(), &DataType::Float64);
    compare_frames(&df, &dta).unwrap();
}

#[test]
fn parquet_output_is_smaller_than_dta() {
    let dir = tempfile::tempdir().unwrap();
    let n = 2_000;
    let df = df!(
        "gvkey" => (0..n).map(|i| format!("{:06}", i % 50)).collect::<Vec<_>>(),
        "fyear" => (0..n).map(|i| 1970 + (i % 50) as i32).collect::<Vec<_>>(),
        "at" => (0..n).map(|i| (i % 97) as f64 * 10.0).collect::<Vec<_>>(),
    )
    .unwrap();
    let report = export_frame(&df, &ExportConfig::default(), dir.path()).unwrap();
    assert!(report.parquet.bytes < report.dta.bytes);
}

#[test]
fn custom_file_names_and_label() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ExportConfig {
        parquet_file: "funda.parquet".into(),
        dta_file: "funda.dta".into(),
        dta_label: "test label".into(),
        ..Default::default()
    };
    let report = export_frame(&extract_like(), &cfg, dir.path()).unwrap();
    assert_eq!(report.parquet.path, dir.path().join("funda.parquet"));
    assert_eq!(report.dta.path, dir.path().join("funda.dta"));

    let bytes = fs::read(&report.dta.path).unwrap();
    let decoded = fundlab_core::export::dta::decode_dta(&bytes).unwrap();
    assert_eq!(decoded.label, "test label");
}

#[test]
fn unwritable_base_dir_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, b"x").unwrap();
    let err = export_frame(&extract_like(), &ExportConfig::default(), &blocker.join("sub"))
        .unwrap_err();
    assert!(matches!(err, ExportError::Io { .. }));
}

#[test]
fn unsupported_column_type_is_a_dta_error() {
    let dir = tempfile::tempdir().unwrap();
    let list = Series::new("nested".into(), [Series::new("".into(), [1i32, 2])]);
    let df = DataFrame::new(vec![list.into()]).unwrap();
    let err = export_frame(&df, &ExportConfig::default(), dir.path()).unwrap_err();
    assert!(matches!(err, ExportError::Dta(_)));
}

//! End-to-end runs: build the query, materialize it, write both files.
//!
//! The remote run owns the session for its whole lifetime and closes it on
//! every exit path, success or failure.

use crate::config::{Config, ExportConfig};
use crate::error::FundlabError;
use crate::export::{self, compare_frames, export_frame, ExportReport, WrittenFile};
use crate::extract::fundamentals_query;
use crate::query::{LocalCatalog, Query};
use crate::source::{Credentials, QuerySource, Session};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of one extract run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub source: String,
    pub rows: usize,
    pub columns: usize,
    pub fetch_ms: u64,
    pub export: ExportReport,
}

/// Materialize `query` from `source` and write it under `base_dir`.
pub async fn run_extract<S: QuerySource>(
    source: &mut S,
    query: &Query,
    export_cfg: &ExportConfig,
    base_dir: &Path,
) -> Result<ExtractReport, FundlabError> {
    let name = source.name();
    info!(source = %name, "materializing extract");
    let started = Instant::now();
    let df = source.fetch(query).await?;
    let fetch_ms = started.elapsed().as_millis() as u64;
    info!(rows = df.height(), columns = df.width(), fetch_ms, "extract materialized");

    let export = export_frame(&df, export_cfg, base_dir)?;
    Ok(ExtractReport {
        source: name,
        rows: df.height(),
        columns: df.width(),
        fetch_ms,
        export,
    })
}

/// Result of a run against the remote database.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteRun {
    /// Table listing, when one was requested.
    pub tables: Option<Vec<String>>,
    pub report: ExtractReport,
}

/// Connect, optionally list `list_schema`, run the extract, disconnect.
pub async fn run_remote(
    config: &Config,
    credentials: &Credentials,
    list_schema: Option<&str>,
) -> Result<RemoteRun, FundlabError> {
    let mut session = Session::connect(&config.connection, credentials).await?;

    let result = async {
        let tables = match list_schema {
            Some(schema) => {
                let tables = session.list_tables(schema).await?;
                info!(schema, count = tables.len(), "tables listed");
                Some(tables)
            }
            None => None,
        };
        let query = fundamentals_query(&config.extract);
        let report =
            run_extract(&mut session, &query, &config.export, &config.output.base_dir).await?;
        Ok::<_, FundlabError>(RemoteRun { tables, report })
    }
    .await;

    let closed = session.close().await;
    match (result, closed) {
        (Ok(run), Ok(())) => Ok(run),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "failed to close session after error");
            Err(e)
        }
    }
}

/// Run the extract against local Parquet snapshots of the two input tables.
pub async fn run_local(
    config: &Config,
    source_parquet: &Path,
    company_parquet: &Path,
) -> Result<ExtractReport, FundlabError> {
    let mut catalog = LocalCatalog::new();
    catalog.register_parquet(config.extract.source_table.clone(), source_parquet)?;
    catalog.register_parquet(config.extract.company_table.clone(), company_parquet)?;

    let query = fundamentals_query(&config.extract);
    run_extract(&mut catalog, &query, &config.export, &config.output.base_dir).await
}

/// Read-back check of a previous export.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub rows: usize,
    pub columns: usize,
    pub label: String,
    pub parquet: WrittenFile,
    pub dta: WrittenFile,
}

impl VerifyReport {
    /// dta size over Parquet size.
    pub fn size_ratio(&self) -> f64 {
        self.dta.bytes as f64 / self.parquet.bytes.max(1) as f64
    }
}

/// Read both exported files back and check they hold the same table.
pub fn verify_exports(export_cfg: &ExportConfig, base_dir: &Path) -> Result<VerifyReport, FundlabError> {
    let parquet_path = export_cfg.parquet_path(base_dir);
    let dta_path = export_cfg.dta_path(base_dir);

    let parquet_df = export::read_parquet(&parquet_path)?;
    let dta_bytes =
        std::fs::read(&dta_path).map_err(|e| export::ExportError::io(&dta_path, e))?;
    let dta = export::dta::decode_dta(&dta_bytes)?;
    compare_frames(&parquet_df, &dta.frame)?;
    info!(rows = parquet_df.height(), "exports agree");

    Ok(VerifyReport {
        rows: parquet_df.height(),
        columns: parquet_df.width(),
        label: dta.label,
        parquet: WrittenFile::stat(parquet_path)?,
        dta: WrittenFile::stat(dta_path)?,
    })
}

//! Query sources: the remote Postgres session and in-memory catalogs.
//!
//! The `QuerySource` trait abstracts over where a query runs, so the extract
//! pipeline is the same against WRDS and against local Parquet snapshots in
//! tests.

pub mod credentials;
pub mod decode;
pub mod session;

pub use credentials::{CredentialPrompt, CredentialSources, Credentials, Password};
pub use session::Session;

use crate::query::{LocalCatalog, Query, QueryError};
use polars::prelude::DataFrame;
use thiserror::Error;

/// Structured errors from the remote source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connection to {target} failed: {cause}")]
    Connect { target: String, cause: String },

    #[error("connection to {target} timed out after {secs}s")]
    ConnectTimeout { target: String, secs: u64 },

    #[error("query failed: {cause}\n--- statement ---\n{sql}")]
    Query { sql: String, cause: String },

    #[error("column '{column}' has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    #[error("failed to decode column '{column}': {cause}")]
    Decode { column: String, cause: String },

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("failed to build result frame: {0}")]
    Frame(String),
}

/// Errors from either backend.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Local(#[from] QueryError),
}

/// Something that can execute a `Query` and materialize the result.
#[allow(async_fn_in_trait)]
pub trait QuerySource {
    /// Human-readable name for logs.
    fn name(&self) -> String;

    /// Execute `query` and pull the full result set into memory.
    async fn fetch(&mut self, query: &Query) -> Result<DataFrame, FetchError>;
}

impl QuerySource for LocalCatalog {
    fn name(&self) -> String {
        "local catalog".to_string()
    }

    async fn fetch(&mut self, query: &Query) -> Result<DataFrame, FetchError> {
        Ok(self.collect(query)?)
    }
}

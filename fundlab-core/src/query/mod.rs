//! Relational query builder with SQL and in-memory backends.

pub mod builder;
pub mod expr;
pub mod local;
pub mod sql;

pub use builder::{Join, Projection, Query, Step, TableRef};
pub use expr::{coalesce, col, lit, when, BinaryOp, CastType, DatePart, Expr, Literal, UnaryOp};
pub use local::LocalCatalog;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors from evaluating a query in memory.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown table '{0}' (not registered in the local catalog)")]
    UnknownTable(String),

    #[error("failed to read {path}: {cause}")]
    Io { path: String, cause: String },

    #[error("query execution failed: {0}")]
    Polars(#[from] PolarsError),
}

impl Query {
    /// Render as a single PostgreSQL statement.
    pub fn to_sql(&self) -> String {
        sql::render(self)
    }

    /// Evaluate against in-memory tables.
    pub fn collect_local(
        &self,
        catalog: &LocalCatalog,
    ) -> Result<polars::prelude::DataFrame, QueryError> {
        catalog.collect(self)
    }
}

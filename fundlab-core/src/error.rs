use crate::config::ConfigError;
use crate::export::ExportError;
use crate::query::QueryError;
use crate::source::{FetchError, SourceError};
use thiserror::Error;

/// Any failure of an extract run.
#[derive(Debug, Error)]
pub enum FundlabError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl From<FetchError> for FundlabError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Source(e) => FundlabError::Source(e),
            FetchError::Local(e) => FundlabError::Query(e),
        }
    }
}

//! fundlab core: the Compustat fundamentals extract.
//!
//! - Query builder with a PostgreSQL renderer and an in-memory polars backend
//! - Authenticated Postgres session and result-set decoding
//! - The extract definition (filters, projection, join, derived fields)
//! - Parquet and Stata dta exporters, readers and cross-format comparison
//! - Configuration and the end-to-end pipeline

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod query;
pub mod source;

pub use config::Config;
pub use error::FundlabError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: values handed across the pipeline are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Config>();
        require_sync::<Config>();
        require_send::<query::Query>();
        require_sync::<query::Query>();
        require_send::<query::LocalCatalog>();
        require_sync::<query::LocalCatalog>();
        require_send::<source::Credentials>();
        require_sync::<source::Credentials>();
        require_send::<export::ExportReport>();
        require_sync::<export::ExportReport>();
        require_send::<pipeline::ExtractReport>();
        require_sync::<pipeline::ExtractReport>();

        // Errors cross into anyhow in the CLI.
        require_send::<FundlabError>();
        require_sync::<FundlabError>();
    }

    /// The session moves between tasks; it needs Send but not Sync.
    #[allow(dead_code)]
    fn session_is_send() {
        fn require_send<T: Send>() {}
        require_send::<source::Session>();
    }
}

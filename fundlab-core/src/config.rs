//! Run configuration.
//!
//! Stored as a TOML file with `[connection]`, `[output]`, `[export]` and
//! `[extract]` sections. Every field has a default, so an empty file (or no
//! file at all) describes the standard WRDS extract.

use crate::query::TableRef;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "fundlab.toml";

/// Environment variable overriding `output.base_dir`.
pub const BASE_DIR_ENV: &str = "FUNDLAB_BASE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {cause}")]
    Read { path: String, cause: String },

    #[error("failed to parse config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// TLS negotiation mode, mirroring libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub sslmode: SslMode,
    /// Login name; prompted for when absent.
    pub username: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "wrds-pgdata.wharton.upenn.edu".to_string(),
            port: 9737,
            database: "wrds".to_string(),
            sslmode: SslMode::Require,
            username: None,
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub parquet_file: String,
    pub dta_file: String,
    /// ZSTD level for the Parquet file (1..=22).
    pub zstd_level: i32,
    /// Dataset label stored in the Stata file (at most 80 bytes).
    pub dta_label: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            parquet_file: "example-data1.parquet".to_string(),
            dta_file: "example-data2.dta".to_string(),
            zstd_level: 19,
            dta_label: "Compustat fundamentals annual".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn parquet_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.parquet_file)
    }

    pub fn dta_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.dta_file)
    }
}

/// The four categorical flags selecting one reporting variant per
/// company-period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingVariant {
    pub indfmt: String,
    pub datafmt: String,
    pub popsrc: String,
    pub consol: String,
}

impl Default for ReportingVariant {
    fn default() -> Self {
        Self {
            indfmt: "INDL".to_string(),
            datafmt: "STD".to_string(),
            popsrc: "D".to_string(),
            consol: "C".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub source_table: TableRef,
    pub company_table: TableRef,
    /// Rows with `fyear` strictly greater than this are kept.
    pub min_fyear: i32,
    /// Country of incorporation (`fic`).
    pub country: String,
    pub variant: ReportingVariant,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            source_table: TableRef::new("comp", "funda"),
            company_table: TableRef::new("comp", "company"),
            min_fyear: 1960,
            country: "USA".to_string(),
            variant: ReportingVariant::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub output: OutputConfig,
    pub export: ExportConfig,
    pub extract: ExtractConfig,
}

impl Config {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `fundlab.toml` when present, else defaults.
    /// `FUNDLAB_BASE_DIR` overrides the output directory either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        if let Ok(dir) = std::env::var(BASE_DIR_ENV) {
            if !dir.is_empty() {
                config.output.base_dir = PathBuf::from(dir);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.is_empty() {
            return Err(ConfigError::Invalid("connection.host is empty".into()));
        }
        if self.connection.port == 0 {
            return Err(ConfigError::Invalid("connection.port must be non-zero".into()));
        }
        if self.connection.database.is_empty() {
            return Err(ConfigError::Invalid("connection.database is empty".into()));
        }
        if !(1..=22).contains(&self.export.zstd_level) {
            return Err(ConfigError::Invalid(format!(
                "export.zstd_level must be in 1..=22, got {}",
                self.export.zstd_level
            )));
        }
        if self.export.parquet_file.is_empty() || self.export.dta_file.is_empty() {
            return Err(ConfigError::Invalid("export file names must be non-empty".into()));
        }
        if self.export.parquet_file == self.export.dta_file {
            return Err(ConfigError::Invalid(
                "export.parquet_file and export.dta_file must differ".into(),
            ));
        }
        if self.export.dta_label.len() > 80 {
            return Err(ConfigError::Invalid(
                "export.dta_label is longer than 80 bytes".into(),
            ));
        }
        if self.extract.country.is_empty() {
            return Err(ConfigError::Invalid("extract.country is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.connection.port, 9737);
        assert_eq!(config.connection.sslmode, SslMode::Require);
        assert_eq!(config.extract.source_table, TableRef::new("comp", "funda"));
        assert_eq!(config.extract.variant.indfmt, "INDL");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = Config::from_toml(
            r#"
[connection]
username = "jdoe"
sslmode = "verify-full"

[output]
base_dir = "/tmp/out"

[extract]
company_table = "comp.company"
min_fyear = 1970
"#,
        )
        .unwrap();

        assert_eq!(config.connection.username.as_deref(), Some("jdoe"));
        assert_eq!(config.connection.sslmode, SslMode::VerifyFull);
        assert_eq!(config.connection.host, "wrds-pgdata.wharton.upenn.edu");
        assert_eq!(config.output.base_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.extract.min_fyear, 1970);
        assert_eq!(config.extract.country, "USA");
    }

    #[test]
    fn export_paths_join_base_dir() {
        let export = ExportConfig::default();
        let base = Path::new("out");
        assert_eq!(export.parquet_path(base), base.join("example-data1.parquet"));
        assert_eq!(export.dta_path(base), base.join("example-data2.dta"));
    }

    #[test]
    fn invalid_zstd_level_rejected() {
        let err = Config::from_toml("[export]\nzstd_level = 40\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("zstd_level")));
    }

    #[test]
    fn invalid_table_ref_rejected() {
        let err = Config::from_toml("[extract]\nsource_table = \"a.b.c\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_sslmode_rejected() {
        assert!(Config::from_toml("[connection]\nsslmode = \"sometimes\"\n").is_err());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

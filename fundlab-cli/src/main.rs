//! fundlab CLI: pull the Compustat fundamentals extract and write Parquet + Stata.
//!
//! Commands:
//! - `export`: connect, run the extract, write both files
//! - `tables`: list the tables of a schema on the remote database
//! - `sql`: print the statement `export` would run
//! - `verify`: read both files back, compare them, report sizes and digests

mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fundlab_core::config::Config;
use fundlab_core::extract::fundamentals_query;
use fundlab_core::pipeline::{run_local, run_remote, verify_exports, ExtractReport, VerifyReport};
use fundlab_core::source::{CredentialSources, Credentials, Session, SourceError};
use prompt::TerminalPrompt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fundlab",
    version,
    about = "Compustat fundamentals extract to Parquet and Stata"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./fundlab.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extract and write both output files.
    Export {
        /// Database user (overrides config and PGUSER).
        #[arg(long)]
        user: Option<String>,

        /// Output directory (overrides config and FUNDLAB_BASE_DIR).
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Also print the tables of the `comp` schema before extracting.
        #[arg(long, default_value_t = false)]
        list_tables: bool,

        /// Run locally against a Parquet snapshot of the fundamentals table.
        #[arg(long, requires = "company", conflicts_with_all = ["user", "list_tables"])]
        source: Option<PathBuf>,

        /// Parquet snapshot of the company header table (with --source).
        #[arg(long, requires = "source")]
        company: Option<PathBuf>,
    },
    /// List the tables of a schema on the remote database.
    Tables {
        #[arg(long, default_value = "comp")]
        schema: String,

        /// Database user (overrides config and PGUSER).
        #[arg(long)]
        user: Option<String>,
    },
    /// Print the SQL statement of the extract.
    Sql,
    /// Read both output files back and check they agree.
    Verify {
        /// Output directory (overrides config and FUNDLAB_BASE_DIR).
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Export {
            user,
            base_dir,
            list_tables,
            source,
            company,
        } => {
            let mut config = config;
            if let Some(dir) = base_dir {
                config.output.base_dir = dir;
            }
            match (source, company) {
                (Some(source), Some(company)) => run_export_local(&config, &source, &company),
                _ => run_export_remote(&config, user, list_tables),
            }
        }
        Commands::Tables { schema, user } => run_tables(&config, &schema, user),
        Commands::Sql => {
            println!("{}", fundamentals_query(&config.extract).to_sql());
            Ok(())
        }
        Commands::Verify { base_dir, json } => {
            let base_dir = base_dir.unwrap_or_else(|| config.output.base_dir.clone());
            run_verify(&config, &base_dir, json)
        }
    }
}

fn resolve_credentials(config: &Config, user: Option<String>) -> Result<Credentials> {
    CredentialSources::from_env(user)
        .resolve(&config.connection, &TerminalPrompt)
        .context("could not obtain database credentials")
}

fn run_export_remote(config: &Config, user: Option<String>, list_tables: bool) -> Result<()> {
    let credentials = resolve_credentials(config, user)?;
    let schema = list_tables.then_some("comp");

    let run = runtime()?
        .block_on(run_remote(config, &credentials, schema))
        .context("extract failed")?;

    if let Some(tables) = &run.tables {
        println!("Tables in comp ({}):", tables.len());
        for t in tables {
            println!("  {t}");
        }
    }
    print_extract(&run.report);
    Ok(())
}

fn run_export_local(config: &Config, source: &Path, company: &Path) -> Result<()> {
    let report = runtime()?
        .block_on(run_local(config, source, company))
        .context("local extract failed")?;
    print_extract(&report);
    Ok(())
}

fn print_extract(report: &ExtractReport) {
    println!("Source:  {}", report.source);
    println!("Rows:    {}", report.rows);
    println!("Columns: {}", report.columns);
    println!(
        "Wrote {} ({} bytes)",
        report.export.parquet.path.display(),
        report.export.parquet.bytes
    );
    println!(
        "Wrote {} ({} bytes)",
        report.export.dta.path.display(),
        report.export.dta.bytes
    );
}

fn run_tables(config: &Config, schema: &str, user: Option<String>) -> Result<()> {
    let credentials = resolve_credentials(config, user)?;
    let tables = runtime()?.block_on(list_and_close(config, &credentials, schema))?;

    for t in &tables {
        println!("{t}");
    }
    Ok(())
}

async fn list_and_close(
    config: &Config,
    credentials: &Credentials,
    schema: &str,
) -> Result<Vec<String>, SourceError> {
    let mut session = Session::connect(&config.connection, credentials).await?;
    info!(server = session.target(), schema, "listing tables");
    let listed = session.list_tables(schema).await;
    finish_session(session.close().await, listed)
}

/// The listing error wins over a close error; a failed close after a
/// successful listing is still an error.
fn finish_session<T>(
    closed: Result<(), SourceError>,
    result: Result<T, SourceError>,
) -> Result<T, SourceError> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "failed to close session after error");
            Err(e)
        }
    }
}

#[derive(Serialize)]
struct VerifyOutput<'a> {
    #[serde(flatten)]
    report: &'a VerifyReport,
    size_ratio: f64,
    parquet_blake3: String,
    dta_blake3: String,
}

fn digest(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn run_verify(config: &Config, base_dir: &Path, json: bool) -> Result<()> {
    let report = verify_exports(&config.export, base_dir)
        .with_context(|| format!("verification of {} failed", base_dir.display()))?;
    let output = VerifyOutput {
        report: &report,
        size_ratio: report.size_ratio(),
        parquet_blake3: digest(&report.parquet.path)?,
        dta_blake3: digest(&report.dta.path)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Rows:    {}", report.rows);
    println!("Columns: {}", report.columns);
    println!("Label:   {}", report.label);
    println!(
        "Parquet: {} ({} bytes, blake3 {})",
        report.parquet.path.display(),
        report.parquet.bytes,
        output.parquet_blake3
    );
    println!(
        "Stata:   {} ({} bytes, blake3 {})",
        report.dta.path.display(),
        report.dta.bytes,
        output.dta_blake3
    );
    println!("dta/parquet size ratio: {:.2}", output.size_ratio);
    println!("OK: both files hold the same table");
    Ok(())
}

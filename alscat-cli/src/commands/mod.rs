pub mod analyze;
pub mod build;
pub mod clean;
pub mod maintain;
pub mod query;
pub mod ramify;
pub mod report;
pub mod scan;
pub mod status;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;

use alscat_core::config::CatalogConfig;
use alscat_core::progress::IndicatifReporter;
use alscat_core::types::Scope;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a folder tree into snapshot files for one scope
    Scan(scan::ScanArgs),
    /// Load snapshots into the catalog database
    Build(build::BuildArgs),
    /// Recompute analytics tables
    Analyze(analyze::AnalyzeArgs),
    /// Run one read-only catalog query
    Query(query::QueryArgs),
    /// Print a combined catalog report
    Report(report::ReportArgs),
    /// Show per-scope table counts and database details
    Status(status::StatusArgs),
    /// Set the RAM flag on every audio clip of project documents
    Ramify(ramify::RamifyArgs),
    /// Optimize, prune or vacuum the catalog database
    Maintain(maintain::MaintainArgs),
    /// Remove snapshot artifacts for a scope
    Clean(clean::CleanArgs),
    /// Scan, append-ingest and recompute analytics in one step
    Update(update::UpdateArgs),
}

pub async fn run(cmd: Command, quiet: bool) -> anyhow::Result<()> {
    match cmd {
        Command::Scan(args) => scan::run(args, quiet).await,
        Command::Build(args) => build::run(args, quiet).await,
        Command::Analyze(args) => analyze::run(args).await,
        Command::Query(args) => query::run(&args),
        Command::Report(args) => report::run(&args),
        Command::Status(args) => status::run(&args),
        Command::Ramify(args) => ramify::run(&args),
        Command::Maintain(args) => maintain::run(args).await,
        Command::Clean(args) => clean::run(&args),
        Command::Update(args) => update::run(args, quiet).await,
    }
}

/// Location of the catalog directory and its configuration.
#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    /// Catalog directory (database, snapshots, config.toml)
    #[arg(long, env = "ALSCAT_CATALOG", default_value = "alscat-catalog")]
    pub catalog: PathBuf,

    /// Config file (default: <catalog>/config.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CatalogArgs {
    pub fn load_config(&self) -> anyhow::Result<CatalogConfig> {
        match &self.config {
            Some(path) => CatalogConfig::load(path)
                .with_context(|| format!("Cannot load config: {}", path.display())),
            None => CatalogConfig::load_or_default(&self.catalog).with_context(|| {
                format!("Cannot load config from {}", self.catalog.display())
            }),
        }
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        CatalogConfig::snapshot_dir(&self.catalog)
    }

    /// Database path; fails when no catalog has been built yet.
    pub fn existing_db(&self, config: &CatalogConfig) -> anyhow::Result<PathBuf> {
        let db = config.db_path(&self.catalog);
        if !db.is_file() {
            anyhow::bail!(
                "{} is not a catalog (no database at {}). Run `alscat build` first.",
                self.catalog.display(),
                db.display()
            );
        }
        Ok(db)
    }
}

/// Scopes named on the command line, or every configured scope.
pub fn resolve_scopes(requested: &[Scope], config: &CatalogConfig) -> Vec<Scope> {
    if requested.is_empty() {
        config.catalog.scopes.clone()
    } else {
        requested.to_vec()
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn progress_reporter(quiet: bool) -> IndicatifReporter {
    IndicatifReporter::new(!quiet)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode JSON output")?
    );
    Ok(())
}

/// Print serializable rows as a tab-separated table with a header line.
pub fn print_rows<T: Serialize>(rows: &[T], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(rows);
    }
    if rows.is_empty() {
        println!("(no rows)");
        return Ok(());
    }
    let values: Vec<serde_json::Value> = rows
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .context("Failed to encode rows")?;
    let columns: Vec<String> = match &values[0] {
        serde_json::Value::Object(map) => map.keys().cloned().collect(),
        _ => vec!["value".to_string()],
    };
    println!("{}", columns.join("\t"));
    for value in &values {
        let cells: Vec<String> = match value {
            serde_json::Value::Object(map) => columns
                .iter()
                .map(|c| map.get(c).map(cell).unwrap_or_default())
                .collect(),
            other => vec![cell(other)],
        };
        println!("{}", cells.join("\t"));
    }
    Ok(())
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a unix timestamp for humans.
pub fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0).map_or_else(
        || secs.to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Canonicalize a user-supplied path with a uniform error message.
pub fn resolve_path(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve path: {}", path.display()))
}

use anyhow::Context;
use clap::Args;

use alscat_core::error::CatalogError;
use alscat_core::ingest::{self, IngestMode, IngestOptions, IngestReport};
use alscat_core::types::Scope;

use super::{CatalogArgs, OutputFormat, print_json, progress_reporter, resolve_scopes};

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Scopes to load (repeatable; default: every configured scope)
    #[arg(long = "scope")]
    pub scopes: Vec<Scope>,

    /// Drop and rebuild an existing catalog
    #[arg(long)]
    pub overwrite: bool,

    /// Merge only new snapshot records into an existing catalog
    #[arg(long)]
    pub append: bool,

    /// Run VACUUM after loading
    #[arg(long)]
    pub vacuum: bool,

    /// Rows per savepoint
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub async fn run(args: BuildArgs, quiet: bool) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let mode = IngestMode::from_flags(args.overwrite, args.append).map_err(CatalogError::from)?;
    let db_path = config.db_path(&args.catalog.catalog);
    let scopes = resolve_scopes(&args.scopes, &config);

    let store = ingest::open_catalog(&db_path, mode)
        .await
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;
    let options = IngestOptions {
        mode,
        batch_size: args.batch_size.unwrap_or(config.ingest.batch_size),
        vacuum: args.vacuum,
    };
    let progress = progress_reporter(quiet);
    let report = ingest::ingest(
        &store,
        &args.catalog.snapshot_dir(),
        &scopes,
        &options,
        &progress,
    )
    .await
    .context("Ingest failed; no changes were committed")?;

    match args.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report, &db_path),
    }
    Ok(())
}

fn print_report(report: &IngestReport, db_path: &std::path::Path) {
    println!("Catalog {} ({})", db_path.display(), report.mode);
    println!();
    for scope in &report.scopes {
        println!("  [{}]", scope.scope);
        println!("    Files:       {}", scope.files);
        println!("    Documents:   {}", scope.documents);
        println!("    References:  {}", scope.references);
        println!("    Scan state:  {}", scope.scan_state);
        if scope.pruned_references > 0 {
            println!("    Pruned refs: {}", scope.pruned_references);
        }
        println!("    Catalog docs: {}", scope.catalog_docs);
    }
    if !report.skipped_scopes.is_empty() {
        let skipped: Vec<&str> = report.skipped_scopes.iter().map(Scope::as_str).collect();
        println!();
        println!("  No snapshots for: {}", skipped.join(", "));
    }
    println!();
    if report.vacuumed {
        println!("  Vacuumed");
    }
    println!("  Duration: {:.2}s", report.duration_secs);
}

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use alscat_core::pipeline;
use alscat_core::types::Scope;

use super::scan::{install_stop_flag, print_summary};
use super::{CatalogArgs, progress_reporter};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Folder tree to scan
    pub root: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Scope the scanned files belong to
    #[arg(long, default_value_t = Scope::default())]
    pub scope: Scope,
}

pub async fn run(args: UpdateArgs, quiet: bool) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let root = super::resolve_path(&args.root)?;
    let stop = install_stop_flag();
    let progress = progress_reporter(quiet);

    let report = pipeline::update(
        &args.catalog.catalog,
        &root,
        &args.scope,
        &config,
        Some(stop),
        &progress,
    )
    .await
    .with_context(|| format!("Update failed for {}", root.display()))?;

    print_summary(&report.scan, &args.catalog.snapshot_dir());
    println!();
    println!(
        "  Ingested ({}): {} files, {} documents, {} references",
        report.ingest.mode,
        report.ingest.total_files(),
        report.ingest.total_documents(),
        report.ingest.total_references()
    );
    for analysis in &report.analysis {
        println!(
            "  Analytics [{}]: {} tables, {} rows",
            analysis.scope, analysis.stats.tables_written, analysis.stats.rows_written
        );
        for (analyzer, error) in &analysis.stats.errors {
            println!("    ! {analyzer}: {error}");
        }
    }
    Ok(())
}

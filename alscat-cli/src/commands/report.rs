use clap::Args;
use serde::Serialize;

use alscat_core::error::{CatalogError, QueryError};
use alscat_core::query::{CatalogQuery, Scoped};
use alscat_core::types::{
    AudioFootprint, CatalogStats, DeviceUsage, MissingHotspot, ScopeSelector, SetHealth,
    StorageSummary,
};

use super::{CatalogArgs, OutputFormat, format_bytes, print_json};

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Scope to report on, or `all`
    #[arg(long, default_value = "all")]
    pub scope: ScopeSelector,

    /// Rows per ranked section
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct CatalogReport {
    stats: CatalogStats,
    top_devices: Vec<Scoped<DeviceUsage>>,
    worst_health: Vec<Scoped<SetHealth>>,
    missing_hotspots: Vec<Scoped<MissingHotspot>>,
    storage: Vec<Scoped<StorageSummary>>,
    audio_footprint: Vec<Scoped<AudioFootprint>>,
}

fn collect(query: &CatalogQuery, scope: &ScopeSelector, top: usize) -> Result<CatalogReport, QueryError> {
    Ok(CatalogReport {
        stats: query.stats(scope)?,
        top_devices: query.top_devices(scope, Some(top))?,
        worst_health: query.worst_health(scope, Some(top))?,
        missing_hotspots: query.missing_hotspots(scope, Some(top))?,
        storage: query.storage_summary(scope)?,
        audio_footprint: query.audio_footprint(scope)?,
    })
}

pub fn run(args: &ReportArgs) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let db_path = args.catalog.existing_db(&config)?;
    let report = CatalogQuery::open(&db_path)
        .and_then(|q| collect(&q, &args.scope, args.top))
        .map_err(CatalogError::from)?;

    match args.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &CatalogReport) {
    let stats = &report.stats;
    println!("Catalog report");
    println!();
    println!("  Files:      {}", stats.total_files);
    println!(
        "  Documents:  {} ({} failed to parse)",
        stats.documents, stats.document_errors
    );
    println!(
        "  References: {} ({} missing)",
        stats.refs_total, stats.refs_missing
    );

    for row in &report.storage {
        println!();
        println!("  Storage [{}]", row.scope);
        println!(
            "    All documents:   {} in {} files",
            format_bytes(row.row.total_bytes),
            row.row.total_count
        );
        println!(
            "    Without backups: {} in {} files",
            format_bytes(row.row.non_backup_bytes),
            row.row.non_backup_count
        );
    }
    for row in &report.audio_footprint {
        println!();
        println!("  Audio [{}]", row.scope);
        println!(
            "    Referenced:   {} ({} files)",
            format_bytes(row.row.referenced_bytes),
            row.row.referenced_count
        );
        println!(
            "    Unreferenced: {} ({} files)",
            format_bytes(row.row.unreferenced_bytes),
            row.row.unreferenced_count
        );
    }

    if !report.top_devices.is_empty() {
        println!();
        println!("  Top devices:");
        for d in &report.top_devices {
            println!(
                "    {:<32} {:>6} uses in {:>5} sets  [{}]",
                d.row.device, d.row.usage_count, d.row.doc_count, d.scope
            );
        }
    }
    if !report.worst_health.is_empty() {
        println!();
        println!("  Lowest health:");
        for h in &report.worst_health {
            println!(
                "    {:>6.2}  {} ({} missing)",
                h.row.score, h.row.path, h.row.missing_refs
            );
        }
    }
    if !report.missing_hotspots.is_empty() {
        println!();
        println!("  Missing sample hotspots:");
        for m in &report.missing_hotspots {
            println!("    {:>6}  {}", m.row.missing_count, m.row.directory);
        }
    }
}

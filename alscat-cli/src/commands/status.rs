use clap::Args;

use alscat_core::analyze::LAST_ANALYZE_KEY;
use alscat_core::error::CatalogError;
use alscat_core::ingest::LAST_INGEST_KEY;
use alscat_core::query::CatalogQuery;
use alscat_core::types::{CatalogStats, ScopeSelector};

use super::{CatalogArgs, OutputFormat, format_bytes, format_timestamp, print_json};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: &StatusArgs) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let db_path = args.catalog.existing_db(&config)?;
    let query = CatalogQuery::open(&db_path).map_err(CatalogError::from)?;

    let total = query.stats(&ScopeSelector::All).map_err(CatalogError::from)?;
    let mut per_scope = Vec::new();
    for scope in &config.catalog.scopes {
        let stats = query
            .stats(&ScopeSelector::One(scope.clone()))
            .map_err(CatalogError::from)?;
        per_scope.push((scope.clone(), stats));
    }
    let last_ingest = meta_time(&query, LAST_INGEST_KEY)?;
    let last_analyze = meta_time(&query, LAST_ANALYZE_KEY)?;

    if args.format == OutputFormat::Json {
        let scopes: serde_json::Map<String, serde_json::Value> = per_scope
            .iter()
            .map(|(scope, stats)| Ok((scope.to_string(), serde_json::to_value(stats)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        return print_json(&serde_json::json!({
            "database": db_path.display().to_string(),
            "total": total,
            "scopes": scopes,
            "last_ingest_at": last_ingest,
            "last_analyze_at": last_analyze,
        }));
    }

    println!("Catalog: {}", db_path.display());
    println!();
    println!("  Database size:  {}", format_bytes(total.db_size_bytes));
    println!(
        "  Schema version: {}",
        total.schema_version.as_deref().unwrap_or("unknown")
    );
    println!(
        "  Last ingest:    {}",
        last_ingest.map_or_else(|| "never".to_string(), format_timestamp)
    );
    println!(
        "  Last analyze:   {}",
        last_analyze.map_or_else(|| "never".to_string(), format_timestamp)
    );
    println!();
    print_stats("All scopes", &total);
    for (scope, stats) in &per_scope {
        println!();
        print_stats(scope.as_str(), stats);
    }
    Ok(())
}

fn meta_time(query: &CatalogQuery, key: &str) -> anyhow::Result<Option<i64>> {
    let value = query.meta(key).map_err(CatalogError::from)?;
    Ok(value.and_then(|v| v.parse().ok()))
}

fn print_stats(label: &str, stats: &CatalogStats) {
    println!("  [{label}]");
    println!("    Files:         {}", stats.total_files);
    for (kind, count) in &stats.files_by_kind {
        println!("      {kind:<11} {count}");
    }
    println!(
        "    Documents:     {} ({} errors)",
        stats.documents, stats.document_errors
    );
    println!("    Sample refs:   {}", stats.sample_refs);
    println!("    Device hints:  {}", stats.device_hints);
    println!(
        "    References:    {} ({} missing)",
        stats.refs_total, stats.refs_missing
    );
    println!("    Scan state:    {}", stats.scan_state_entries);
}

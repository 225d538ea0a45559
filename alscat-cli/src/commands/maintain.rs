use anyhow::Context;
use clap::Args;

use alscat_core::maintenance::{self, MaintainOptions};
use alscat_core::store::SqliteCatalog;
use alscat_core::types::Scope;

use super::{CatalogArgs, OutputFormat, format_bytes, print_json};

#[derive(Args, Debug)]
pub struct MaintainArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Rewrite the database file to reclaim space
    #[arg(long)]
    pub vacuum: bool,

    /// Remove rows for files that no longer exist on disk
    #[arg(long)]
    pub prune_missing: bool,

    /// Limit pruning to one scope
    #[arg(long, requires = "prune_missing")]
    pub scope: Option<Scope>,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub async fn run(args: MaintainArgs) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let db_path = args.catalog.existing_db(&config)?;
    let store = SqliteCatalog::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;
    let options = MaintainOptions {
        vacuum: args.vacuum,
        prune_missing: args.prune_missing,
        scope: args.scope.clone(),
    };

    let report = maintenance::maintain(&store, &db_path, &options)
        .await
        .context("Maintenance failed")?;

    if args.format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("Maintained {}", db_path.display());
    println!();
    println!("  Size before: {}", format_bytes(report.size_before));
    println!("  Size after:  {}", format_bytes(report.size_after));
    if args.prune_missing {
        println!(
            "  Pruned:      {} files ({} rows)",
            report.pruned_files, report.removed_rows
        );
    }
    println!("  Vacuumed:    {}", if report.vacuumed { "yes" } else { "no" });
    println!("  Duration:    {:.2}s", report.duration_secs);
    Ok(())
}

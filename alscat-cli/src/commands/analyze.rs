use anyhow::Context;
use clap::Args;

use alscat_core::analyze;
use alscat_core::store::SqliteCatalog;
use alscat_core::types::Scope;

use super::{CatalogArgs, resolve_scopes};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Scopes to recompute (repeatable; default: every configured scope)
    #[arg(long = "scope")]
    pub scopes: Vec<Scope>,

    /// Devices per chain signature
    #[arg(long)]
    pub chain_len: Option<usize>,
}

pub async fn run(args: AnalyzeArgs) -> anyhow::Result<()> {
    let mut config = args.catalog.load_config()?;
    if let Some(len) = args.chain_len {
        config.analytics.chain_len = len;
    }
    let db_path = args.catalog.existing_db(&config)?;
    let store = SqliteCatalog::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;
    let scopes = resolve_scopes(&args.scopes, &config);

    let results = analyze::recompute(
        &store,
        &scopes,
        &config.analytics,
        chrono::Utc::now().timestamp(),
    )
    .await
    .context("Analytics recompute failed")?;

    println!("Analytics recomputed in {}", db_path.display());
    println!();
    let mut failures = 0;
    for result in &results {
        println!(
            "  [{}] {} tables, {} rows, {:.2?}",
            result.scope,
            result.stats.tables_written,
            result.stats.rows_written,
            result.stats.duration
        );
        for (analyzer, error) in &result.stats.errors {
            failures += 1;
            println!("    ! {analyzer}: {error}");
        }
    }
    if failures > 0 {
        println!();
        println!("  {failures} analyzer failure(s); other tables were still written.");
    }
    Ok(())
}

use clap::Args;

use alscat_core::error::CatalogError;
use alscat_core::maintenance::{self, CleanTargets};
use alscat_core::types::Scope;

use super::CatalogArgs;

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct CleanArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Scope whose artifacts are removed
    #[arg(long)]
    pub scope: Scope,

    /// Remove the JSONL snapshots
    #[arg(long)]
    pub snapshots: bool,

    /// Remove the saved scan state
    #[arg(long)]
    pub state: bool,

    /// Remove the scan summary
    #[arg(long)]
    pub summary: bool,
}

impl CleanArgs {
    /// Selected artifacts; none selected means all of them.
    fn targets(&self) -> CleanTargets {
        if !(self.snapshots || self.state || self.summary) {
            return CleanTargets::default();
        }
        CleanTargets {
            snapshots: self.snapshots,
            state: self.state,
            summary: self.summary,
        }
    }
}

pub fn run(args: &CleanArgs) -> anyhow::Result<()> {
    let removed =
        maintenance::clean_snapshots(&args.catalog.snapshot_dir(), &args.scope, args.targets())
            .map_err(CatalogError::from)?;
    if removed.is_empty() {
        println!("Nothing to clean for scope {}.", args.scope);
        return Ok(());
    }
    println!("Removed {} file(s) for scope {}:", removed.len(), args.scope);
    for path in &removed {
        println!("  {}", path.display());
    }
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Args;
use tracing::warn;

use alscat_core::error::{CatalogError, ScanError};
use alscat_core::scan::{self, ScanOptions, ScanSummary};
use alscat_core::types::Scope;

use super::{CatalogArgs, OutputFormat, format_timestamp, print_json, progress_reporter};

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct ScanArgs {
    /// Folder tree to scan
    pub root: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Scope the scanned files belong to
    #[arg(long, default_value_t = Scope::default())]
    pub scope: Scope,

    /// Snapshot output directory (default: <catalog>/snapshots)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Also index audio media files
    #[arg(long)]
    pub include_media: bool,

    /// Compute content hashes
    #[arg(long)]
    pub hash: bool,

    /// Re-hash unchanged files and re-index those whose digest changed
    #[arg(long)]
    pub rehash_unchanged: bool,

    /// Read audio properties from WAV media
    #[arg(long)]
    pub analyze_audio: bool,

    /// Ignore saved scan state and index every file
    #[arg(long)]
    pub full: bool,

    /// Leave backup documents out of the index
    #[arg(long)]
    pub skip_backups: bool,

    /// Extra directory names to skip (repeatable)
    #[arg(long = "skip-dir")]
    pub skip_dirs: Vec<String>,

    /// Worker threads for hashing and parsing
    #[arg(long)]
    pub workers: Option<usize>,

    /// Save scan state every N indexed files
    #[arg(long)]
    pub checkpoint_every: Option<u64>,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

impl ScanArgs {
    fn options(&self, base: ScanOptions) -> ScanOptions {
        let mut options = base;
        options.include_media |= self.include_media;
        options.hash |= self.hash || self.rehash_unchanged;
        options.rehash_unchanged |= self.rehash_unchanged;
        options.analyze_audio |= self.analyze_audio;
        options.skip_backups |= self.skip_backups;
        if self.full {
            options.incremental = false;
        }
        options.skip_dirs.extend(self.skip_dirs.iter().cloned());
        if let Some(workers) = self.workers {
            options.workers = workers.max(1);
        }
        if let Some(every) = self.checkpoint_every {
            options.checkpoint_every = every;
        }
        options
    }
}

/// Raise `stop` on Ctrl-C so the scanner saves state and exits cleanly.
pub fn install_stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current file");
            flag.store(true, Ordering::Relaxed);
        }
    });
    stop
}

pub async fn run(args: ScanArgs, quiet: bool) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let root = super::resolve_path(&args.root)?;
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| args.catalog.snapshot_dir());
    let options = args.options(ScanOptions::from(&config.scan));

    let stop = install_stop_flag();
    let progress = progress_reporter(quiet);
    let result = scan::scan_to_snapshot(&root, &out, &args.scope, options, Some(stop), &progress);

    let summary = match result {
        Ok(summary) => summary,
        Err(ScanError::Cancelled { indexed }) => {
            eprintln!("Scan cancelled after {indexed} indexed files; state saved.");
            return Err(CatalogError::Scan(ScanError::Cancelled { indexed }))
                .context("Scan interrupted");
        }
        Err(e) => {
            return Err(CatalogError::Scan(e))
                .with_context(|| format!("Scan failed for {}", root.display()));
        }
    };

    match args.format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print_summary(&summary, &out),
    }
    Ok(())
}

pub fn print_summary(summary: &ScanSummary, out: &std::path::Path) {
    println!("Scanned {} [{}]", summary.root, summary.scope);
    println!();
    println!("  Files walked:     {}", summary.files_walked);
    println!("  Files wanted:     {}", summary.files_wanted);
    println!("  Indexed:          {}", summary.indexed);
    println!("  Skipped:          {}", summary.skipped);
    println!("  Documents parsed: {}", summary.documents_parsed);
    println!("  Document errors:  {}", summary.document_errors);
    if summary.hash_errors > 0 {
        println!("  Hash errors:      {}", summary.hash_errors);
    }
    println!(
        "  References:       {} ({} missing)",
        summary.refs_total, summary.refs_missing
    );
    println!("  Started:          {}", format_timestamp(summary.started_at));
    println!("  Duration:         {:.2}s", summary.duration_secs);

    if !summary.by_ext.is_empty() {
        println!();
        println!("  By extension:");
        for (ext, count) in &summary.by_ext {
            println!("    .{ext:<10} {count:>6}");
        }
    }
    if !summary.top_dirs.is_empty() {
        println!();
        println!("  Top directories:");
        for dir in summary.top_dirs.iter().take(10) {
            println!("    {:<40} {:>6}", dir.dir, dir.count);
        }
    }
    println!();
    println!("  Snapshots: {}", out.display());
}

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::warn;
use walkdir::WalkDir;

use alscat_doc::DEFAULT_MAX_DECOMPRESSED;
use alscat_doc::ramify::{self, RamifyMode, RamifyReport};

#[derive(Args, Debug)]
pub struct RamifyArgs {
    /// Documents or folders to patch (folders are searched for .als files)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Overwrite each document after a one-time .bak copy
    #[arg(long, conflicts_with = "sibling")]
    pub in_place: bool,

    /// Write <stem>.ram.als next to each document
    #[arg(long)]
    pub sibling: bool,

    /// Refuse documents that decompress beyond this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_DECOMPRESSED)]
    pub max_bytes: usize,
}

impl RamifyArgs {
    fn mode(&self) -> RamifyMode {
        if self.in_place {
            RamifyMode::InPlace
        } else if self.sibling {
            RamifyMode::Sibling
        } else {
            RamifyMode::DryRun
        }
    }
}

/// Expand folders into the `.als` documents beneath them, skipping
/// sibling outputs from earlier runs.
fn collect_documents(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    for path in paths {
        let resolved = super::resolve_path(path)?;
        if resolved.is_file() {
            documents.push(resolved);
            continue;
        }
        for entry in WalkDir::new(&resolved).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_patchable(entry.path()) {
                documents.push(entry.into_path());
            }
        }
    }
    Ok(documents)
}

fn is_patchable(path: &Path) -> bool {
    let is_als = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("als"));
    let is_output = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(".ram"));
    is_als && !is_output
}

pub fn run(args: &RamifyArgs) -> anyhow::Result<()> {
    let mode = args.mode();
    let documents = collect_documents(&args.paths)?;
    if documents.is_empty() {
        println!("No .als documents found.");
        return Ok(());
    }

    let mut totals = RamifyReport::default();
    let mut failed = 0usize;
    for path in &documents {
        match ramify::ramify_file(path, mode, args.max_bytes) {
            Ok(report) => {
                print_report(&report);
                totals.audio_clips += report.audio_clips;
                totals.ram_flips += report.ram_flips;
            }
            Err(e) => {
                failed += 1;
                println!("{}: ERROR {e}", path.display());
            }
        }
    }

    println!();
    println!(
        "Total: {} documents, AudioClips={} RamFlips={}{}",
        documents.len(),
        totals.audio_clips,
        totals.ram_flips,
        if mode == RamifyMode::DryRun {
            " (dry run, nothing written)"
        } else {
            ""
        }
    );
    if failed > 0 {
        anyhow::bail!("ramify failed for {failed} documents");
    }
    Ok(())
}

fn print_report(report: &RamifyReport) {
    let mut line = format!(
        "{}: AudioClips={} RamFlips={}",
        report.path.display(),
        report.audio_clips,
        report.ram_flips
    );
    if let Some(written) = &report.written {
        let _ = write!(line, " -> {}", written.display());
    }
    if let Some(backup) = &report.backup {
        let _ = write!(line, " (backup {})", backup.display());
    }
    println!("{line}");
}

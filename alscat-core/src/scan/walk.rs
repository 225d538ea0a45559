//! Directory traversal and candidate selection.
//!
//! Traversal is sequential and sorted by file name so that event order is
//! stable between runs; per-file work happens afterwards in `Scanner`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::types::{ARTIFACT_EXTENSIONS, MEDIA_EXTENSIONS, is_backup_path};

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Lower-cased extension without the dot.
    pub ext: String,
}

impl Candidate {
    /// Catalog key for this file.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Traversal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub files_walked: u64,
    pub dirs_skipped: u64,
}

/// Which directories and files the walk keeps.
#[derive(Debug, Clone)]
pub struct WalkFilter {
    wanted_exts: HashSet<String>,
    skip_dirs: HashSet<String>,
    exclude: Vec<glob::Pattern>,
    skip_backups: bool,
    excluded_roots: Vec<PathBuf>,
}

impl WalkFilter {
    pub fn new(include_media: bool, skip_dirs: &[String], skip_backups: bool) -> Self {
        let mut wanted_exts: HashSet<String> = alscat_doc::DOCUMENT_EXTENSIONS
            .iter()
            .chain(ARTIFACT_EXTENSIONS)
            .map(|e| (*e).to_string())
            .collect();
        if include_media {
            wanted_exts.extend(MEDIA_EXTENSIONS.iter().map(|e| (*e).to_string()));
        }
        Self {
            wanted_exts,
            skip_dirs: skip_dirs.iter().cloned().collect(),
            exclude: Vec::new(),
            skip_backups,
            excluded_roots: Vec::new(),
        }
    }

    /// Leave out paths matching any of these glob patterns.
    pub fn with_patterns(mut self, patterns: Vec<glob::Pattern>) -> Self {
        self.exclude = patterns;
        self
    }

    /// Never descend into `dir` (e.g. the snapshot output directory).
    pub fn excluding(mut self, dir: PathBuf) -> Self {
        self.excluded_roots.push(dir);
        self
    }

    pub fn wants_extension(&self, ext: &str) -> bool {
        self.wanted_exts.contains(ext)
    }

    fn skips_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        self.skip_dirs.contains(name.as_ref())
            || self.excluded_roots.iter().any(|root| entry.path() == root)
    }

    fn keeps_file(&self, path: &Path, ext: &str) -> bool {
        if !self.wants_extension(ext) {
            return false;
        }
        let text = path.to_string_lossy();
        if self.skip_backups && is_backup_path(&text) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(&text))
    }
}

/// Lower-cased extension of `path` without the dot; empty when absent.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Walk `root` once and return the wanted files in name order.
pub fn collect_candidates(root: &Path, filter: &WalkFilter) -> (Vec<Candidate>, WalkStats) {
    let mut stats = WalkStats::default();
    let mut candidates = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() && filter.skips_dir(entry) {
                stats.dirs_skipped += 1;
                return false;
            }
            true
        });

    let mut walked = 0u64;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        walked += 1;
        let ext = extension_of(entry.path());
        if filter.keeps_file(entry.path(), &ext) {
            candidates.push(Candidate {
                path: entry.into_path(),
                ext,
            });
        }
    }
    stats.files_walked = walked;

    (candidates, stats)
}

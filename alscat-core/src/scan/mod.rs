//! Incremental filesystem scanner.
//!
//! A scan walks the tree once, then fingerprints, hashes and parses each
//! wanted file. Work per file is independent, so it may fan out over a rayon
//! pool; events are always emitted and scan state always updated on the
//! calling thread, in walk order.

pub mod snapshot;
pub mod state;
pub mod walk;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use alscat_doc::{DocumentParser, HeuristicParser, decode_file, is_document_extension};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::ScanSection;
use crate::error::ScanError;
use crate::progress::ProgressReporter;
use crate::types::{
    AudioInfo, DocumentRecord, FileKind, FileRecord, Fingerprint, MEDIA_EXTENSIONS, RefEdge,
    RefKind, ScanEvent, Scope,
};

pub use snapshot::{SnapshotReader, SnapshotWriter};
pub use state::{Decision, ScanState, decide};
pub use walk::{Candidate, WalkFilter, WalkStats, collect_candidates};

/// Destination for scanner events.
pub trait EventSink {
    fn emit(&mut self, event: ScanEvent) -> Result<(), ScanError>;

    /// Make emitted events durable. Called before every state checkpoint.
    fn flush(&mut self) -> Result<(), ScanError> {
        Ok(())
    }
}

impl EventSink for Vec<ScanEvent> {
    fn emit(&mut self, event: ScanEvent) -> Result<(), ScanError> {
        self.push(event);
        Ok(())
    }
}

/// Scanner switches. Defaults mirror `[scan]` in the config file.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct ScanOptions {
    pub include_media: bool,
    pub incremental: bool,
    pub hash: bool,
    pub rehash_unchanged: bool,
    pub analyze_audio: bool,
    pub skip_backups: bool,
    pub skip_dirs: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub workers: usize,
    pub checkpoint_every: u64,
    pub max_decompressed_bytes: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScanSection::default())
    }
}

impl From<&ScanSection> for ScanOptions {
    fn from(section: &ScanSection) -> Self {
        Self {
            include_media: section.include_media,
            incremental: section.incremental,
            hash: section.hash,
            rehash_unchanged: section.rehash_unchanged,
            analyze_audio: section.analyze_audio,
            skip_backups: section.skip_backups,
            skip_dirs: section.skip_dirs.clone(),
            exclude_patterns: section.exclude_patterns.clone(),
            workers: section.workers.max(1),
            checkpoint_every: section.checkpoint_every,
            max_decompressed_bytes: section.max_decompressed_bytes,
        }
    }
}

/// Count of indexed files under one directory bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirCount {
    pub dir: String,
    pub count: u64,
}

/// Run-level counts reported after every scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub root: String,
    pub scope: Scope,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_secs: f64,
    pub files_walked: u64,
    pub files_wanted: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub vanished: u64,
    pub documents_parsed: u64,
    pub document_errors: u64,
    pub hash_errors: u64,
    pub dirs_skipped: u64,
    pub refs_total: u64,
    pub refs_missing: u64,
    pub by_ext: BTreeMap<String, u64>,
    pub top_dirs: Vec<DirCount>,
    pub cancelled: bool,
}

/// Everything derived from one indexed file.
#[derive(Debug)]
struct Processed {
    file: FileRecord,
    fingerprint: Fingerprint,
    document: Option<DocumentRecord>,
    refs: Vec<RefEdge>,
}

#[derive(Debug)]
enum Outcome {
    Skipped,
    /// Stat failed, usually a concurrent delete.
    Vanished,
    Cancelled,
    Indexed(Box<Processed>),
}

const TOP_DIRS: usize = 20;

/// Walks one root for one scope.
pub struct Scanner {
    root: PathBuf,
    scope: Scope,
    options: ScanOptions,
    parser: Box<dyn DocumentParser>,
    stop: Option<Arc<AtomicBool>>,
    excluded: Vec<PathBuf>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("root", &self.root)
            .field("scope", &self.scope)
            .field("options", &self.options)
            .field("parser", &self.parser.name())
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Create a scanner for `root`, which must be an existing directory.
    pub fn new(root: &Path, scope: Scope, options: ScanOptions) -> Result<Self, ScanError> {
        let root = std::fs::canonicalize(root)
            .map_err(|_| ScanError::InvalidRoot(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(ScanError::InvalidRoot(root));
        }
        Ok(Self {
            root,
            scope,
            options,
            parser: Box::new(HeuristicParser),
            stop: None,
            excluded: Vec::new(),
        })
    }

    /// Replace the document parser.
    pub fn with_parser(mut self, parser: Box<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Check `flag` between files and stop early when it is raised.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Never descend into `dir`.
    pub fn excluding(mut self, dir: &Path) -> Self {
        let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        self.excluded.push(dir);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn walk_filter(&self) -> Result<WalkFilter, ScanError> {
        let patterns = self
            .options
            .exclude_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| ScanError::Snapshot {
                    path: PathBuf::from(p),
                    message: format!("invalid exclude pattern: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut filter = WalkFilter::new(
            self.options.include_media,
            &self.options.skip_dirs,
            self.options.skip_backups,
        )
        .with_patterns(patterns);
        for dir in &self.excluded {
            filter = filter.excluding(dir.clone());
        }
        Ok(filter)
    }

    /// Run one pass, emitting events for changed files only.
    ///
    /// `state` is updated in place. When `state_path` is given the state is
    /// saved there at checkpoints, on cancellation and at the end of the pass.
    #[instrument(skip_all, name = "scan", fields(scope = %self.scope))]
    pub fn scan(
        &self,
        state: &mut ScanState,
        sink: &mut dyn EventSink,
        state_path: Option<&Path>,
        progress: &dyn ProgressReporter,
    ) -> Result<ScanSummary, ScanError> {
        let start = Instant::now();
        let started_at = now_secs();
        let mut tally = Tally::new(self, started_at);

        let (candidates, walk_stats) = collect_candidates(&self.root, &self.walk_filter()?);
        tally.summary.files_walked = walk_stats.files_walked;
        tally.summary.dirs_skipped = walk_stats.dirs_skipped;
        tally.summary.files_wanted = candidates.len() as u64;
        debug!(candidates = candidates.len(), "Walk complete");

        progress.start("scan", Some(candidates.len() as u64));

        let mut cancelled = false;
        if self.options.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.workers)
                .build()
                .map_err(|e| ScanError::Pool(e.to_string()))?;
            let shared: &ScanState = state;
            let outcomes: Vec<Outcome> = pool.install(|| {
                candidates
                    .par_iter()
                    .map(|candidate| {
                        if self.stopped() {
                            return Outcome::Cancelled;
                        }
                        self.process(candidate, shared.get(&candidate.key()), started_at)
                    })
                    .collect()
            });
            for outcome in outcomes {
                if matches!(outcome, Outcome::Cancelled) {
                    cancelled = true;
                    continue;
                }
                tally.apply(outcome, state, sink, state_path, &self.options)?;
                progress.advance(1);
            }
        } else {
            for candidate in &candidates {
                if self.stopped() {
                    cancelled = true;
                    break;
                }
                let prev = state.get(&candidate.key()).cloned();
                let outcome = self.process(candidate, prev.as_ref(), started_at);
                tally.apply(outcome, state, sink, state_path, &self.options)?;
                progress.advance(1);
            }
        }

        sink.flush()?;
        if let Some(path) = state_path {
            state.save(path)?;
        }
        progress.finish();

        let summary = tally.finish(start, cancelled);
        if cancelled {
            warn!(indexed = summary.indexed, "Scan cancelled");
            return Err(ScanError::Cancelled {
                indexed: summary.indexed,
            });
        }

        info!(
            indexed = summary.indexed,
            skipped = summary.skipped,
            documents = summary.documents_parsed,
            document_errors = summary.document_errors,
            duration = ?start.elapsed(),
            "Scan complete"
        );
        Ok(summary)
    }

    /// Fingerprint, hash and parse one candidate. Never fails; per-file
    /// problems are recorded on the emitted records.
    fn process(&self, candidate: &Candidate, prev: Option<&Fingerprint>, scanned_at: i64) -> Outcome {
        let Ok(meta) = std::fs::metadata(&candidate.path) else {
            debug!(path = %candidate.path.display(), "File vanished before stat");
            return Outcome::Vanished;
        };
        let size = meta.len();
        let mtime = meta.modified().map_or(0, system_time_secs);
        let ctime = meta.created().ok().map(system_time_secs);

        let decision = decide(
            prev,
            size,
            mtime,
            self.options.incremental,
            self.options.hash,
            self.options.rehash_unchanged,
            || hash_file(&candidate.path).map_err(|e| e.to_string()),
        );

        let hashed = match decision {
            Decision::Skip => return Outcome::Skipped,
            Decision::Index if self.options.hash => {
                Some(hash_file(&candidate.path).map_err(|e| e.to_string()))
            }
            Decision::Index => None,
            Decision::IndexHashed(result) => Some(result),
        };
        let (content_hash, hash_error) = match hashed {
            Some(Ok(hash)) => (Some(hash), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };

        let path = candidate.key();
        let file = FileRecord {
            path_hash: blake3::hash(path.to_lowercase().as_bytes()).to_hex().to_string(),
            ext: candidate.ext.clone(),
            size,
            mtime,
            ctime,
            name: candidate
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            parent: candidate
                .path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime: mime_guess::from_path(&candidate.path)
                .first()
                .map(|m| m.essence_str().to_string()),
            kind: FileKind::from_extension(&candidate.ext),
            scanned_at,
            scope: self.scope.clone(),
            content_hash: content_hash.clone(),
            hash_error,
            audio: self.audio_info(candidate),
            path,
        };

        let fingerprint = Fingerprint {
            size,
            mtime,
            content_hash,
        };

        let (document, refs) = if is_document_extension(&candidate.ext) {
            self.parse_document(&file)
        } else {
            (None, Vec::new())
        };

        Outcome::Indexed(Box::new(Processed {
            file,
            fingerprint,
            document,
            refs,
        }))
    }

    fn parse_document(&self, file: &FileRecord) -> (Option<DocumentRecord>, Vec<RefEdge>) {
        let text = match decode_file(Path::new(&file.path), self.options.max_decompressed_bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %file.path, error = %e, "Document decode failed");
                let record = DocumentRecord::failed(
                    file.path.clone(),
                    file.ext.clone(),
                    self.scope.clone(),
                    file.scanned_at,
                    e.to_string(),
                );
                return (Some(record), Vec::new());
            }
        };

        let summary = self.parser.parse(&text);
        let refs = summary
            .sample_refs
            .iter()
            .map(|sample| RefEdge {
                src: file.path.clone(),
                src_kind: file.ext.clone(),
                ref_kind: RefKind::Sample,
                ref_path: sample.clone(),
                exists: self.reference_exists(sample),
                scanned_at: file.scanned_at,
                scope: self.scope.clone(),
            })
            .collect();

        let record = DocumentRecord::parsed(
            file.path.clone(),
            file.ext.clone(),
            self.scope.clone(),
            file.scanned_at,
            summary,
        );
        (Some(record), refs)
    }

    fn reference_exists(&self, reference: &str) -> bool {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.exists()
        } else {
            self.root.join(path).exists()
        }
    }

    fn audio_info(&self, candidate: &Candidate) -> Option<AudioInfo> {
        if !self.options.analyze_audio || !MEDIA_EXTENSIONS.contains(&candidate.ext.as_str()) {
            return None;
        }
        let mut info = AudioInfo {
            codec: candidate.ext.clone(),
            duration_secs: None,
            sample_rate: None,
            channels: None,
            bit_depth: None,
        };
        if candidate.ext == "wav" {
            match hound::WavReader::open(&candidate.path) {
                Ok(reader) => {
                    let spec = reader.spec();
                    info.sample_rate = Some(spec.sample_rate);
                    info.channels = Some(spec.channels);
                    info.bit_depth = Some(spec.bits_per_sample);
                    if spec.sample_rate > 0 {
                        info.duration_secs =
                            Some(f64::from(reader.duration()) / f64::from(spec.sample_rate));
                    }
                }
                Err(e) => {
                    debug!(path = %candidate.path.display(), error = %e, "WAV header unreadable");
                }
            }
        }
        Some(info)
    }
}

/// Mutable counters and checkpoint bookkeeping for one pass.
struct Tally {
    summary: ScanSummary,
    top_dirs: BTreeMap<String, u64>,
    root: PathBuf,
    since_checkpoint: u64,
}

impl Tally {
    fn new(scanner: &Scanner, started_at: i64) -> Self {
        Self {
            summary: ScanSummary {
                root: scanner.root.display().to_string(),
                scope: scanner.scope.clone(),
                started_at,
                ..ScanSummary::default()
            },
            top_dirs: BTreeMap::new(),
            root: scanner.root.clone(),
            since_checkpoint: 0,
        }
    }

    fn apply(
        &mut self,
        outcome: Outcome,
        state: &mut ScanState,
        sink: &mut dyn EventSink,
        state_path: Option<&Path>,
        options: &ScanOptions,
    ) -> Result<(), ScanError> {
        let processed = match outcome {
            Outcome::Skipped => {
                self.summary.skipped += 1;
                return Ok(());
            }
            Outcome::Vanished => {
                self.summary.vanished += 1;
                return Ok(());
            }
            Outcome::Cancelled => return Ok(()),
            Outcome::Indexed(processed) => *processed,
        };

        let Processed {
            file,
            fingerprint,
            document,
            refs,
        } = processed;

        self.summary.indexed += 1;
        *self.summary.by_ext.entry(file.ext.clone()).or_default() += 1;
        *self.top_dirs.entry(self.bucket(&file.path)).or_default() += 1;
        if file.hash_error.is_some() {
            self.summary.hash_errors += 1;
        }

        state.insert(file.path.clone(), fingerprint);
        sink.emit(ScanEvent::File(file))?;

        if let Some(document) = document {
            if document.error.is_some() {
                self.summary.document_errors += 1;
            } else {
                self.summary.documents_parsed += 1;
            }
            sink.emit(ScanEvent::Document(document))?;
        }
        for edge in refs {
            self.summary.refs_total += 1;
            if !edge.exists {
                self.summary.refs_missing += 1;
            }
            sink.emit(ScanEvent::Reference(edge))?;
        }

        self.since_checkpoint += 1;
        if let Some(path) = state_path {
            if options.checkpoint_every > 0 && self.since_checkpoint >= options.checkpoint_every {
                sink.flush()?;
                state.save(path)?;
                self.since_checkpoint = 0;
                debug!(indexed = self.summary.indexed, "Scan state checkpointed");
            }
        }
        Ok(())
    }

    /// First two path components relative to the scan root.
    fn bucket(&self, path: &str) -> String {
        let rel = Path::new(path)
            .strip_prefix(&self.root)
            .unwrap_or_else(|_| Path::new(path));
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        match parts.len() {
            0 => String::new(),
            1 => parts[0].clone(),
            _ => format!("{}/{}", parts[0], parts[1]),
        }
    }

    fn finish(mut self, start: Instant, cancelled: bool) -> ScanSummary {
        let mut dirs: Vec<DirCount> = self
            .top_dirs
            .into_iter()
            .map(|(dir, count)| DirCount { dir, count })
            .collect();
        dirs.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.dir.cmp(&b.dir)));
        dirs.truncate(TOP_DIRS);
        self.summary.top_dirs = dirs;
        self.summary.finished_at = now_secs();
        self.summary.duration_secs = start.elapsed().as_secs_f64();
        self.summary.cancelled = cancelled;
        self.summary
    }
}

/// Scan `root` into the snapshot directory for `scope` under `out_dir`.
///
/// Loads and saves `scan_state.json` and writes `scan_summary.json`.
pub fn scan_to_snapshot(
    root: &Path,
    out_dir: &Path,
    scope: &Scope,
    options: ScanOptions,
    stop: Option<Arc<AtomicBool>>,
    progress: &dyn ProgressReporter,
) -> Result<ScanSummary, ScanError> {
    let dir = snapshot::scope_dir(out_dir, scope);
    let mut writer = SnapshotWriter::open(&dir)?;

    let mut scanner = Scanner::new(root, scope.clone(), options)?.excluding(out_dir);
    if let Some(flag) = stop {
        scanner = scanner.with_stop_flag(flag);
    }
    let state_path = dir.join(snapshot::SCAN_STATE);
    let mut state = ScanState::load(&state_path)?;

    let summary = scanner.scan(&mut state, &mut writer, Some(&state_path), progress)?;

    let summary_path = dir.join(snapshot::SCAN_SUMMARY);
    let bytes = serde_json::to_vec_pretty(&summary).map_err(|e| ScanError::Snapshot {
        path: summary_path.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(&summary_path, bytes)?;
    Ok(summary)
}

/// Streamed blake3 digest of a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn now_secs() -> i64 {
    system_time_secs(SystemTime::now())
}

fn system_time_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

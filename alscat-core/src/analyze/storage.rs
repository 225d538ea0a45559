// Storage analytics: document byte totals, activity windows, largest sets
// and the audio footprint.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use tracing::{info, instrument};

use crate::store::CatalogStore;
use crate::types::{
    ActivityWindow, AudioFootprint, FileEntry, FileKind, Materialized, SetSize, StorageSummary,
    UnreferencedDir, is_backup_path,
};

use super::health::parent_directory;
use super::traits::{AnalyzeContext, Analyzer};
use super::{AnalyzeStats, write_table};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageAnalyzer;

#[async_trait::async_trait]
impl Analyzer for StorageAnalyzer {
    fn name(&self) -> &'static str {
        "storage"
    }

    #[instrument(skip_all, name = "storage_analyze", fields(scope = %ctx.scope))]
    async fn analyze(
        &self,
        store: &dyn CatalogStore,
        ctx: &AnalyzeContext,
    ) -> crate::error::Result<AnalyzeStats> {
        let start = Instant::now();
        let mut stats = AnalyzeStats::default();

        let documents = store.files(&ctx.scope, Some(FileKind::Document)).await?;
        let media = store.files(&ctx.scope, Some(FileKind::Media)).await?;
        let referenced = normalize_all(store.referenced_samples().await?);

        let summary = compute_storage_summary(&documents);
        let activity = compute_activity(&documents, &ctx.config.activity_windows, ctx.now);
        let largest = compute_largest_sets(&documents, ctx.config.top_sets);
        let footprint = compute_audio_footprint(&media, &referenced);
        let unreferenced = compute_unreferenced_by_dir(&media, &referenced);

        write_table(store, ctx, Materialized::StorageSummary(summary), &mut stats).await?;
        write_table(store, ctx, Materialized::ActivityWindows(activity), &mut stats).await?;
        write_table(store, ctx, Materialized::SetSizeTop(largest), &mut stats).await?;
        write_table(store, ctx, Materialized::AudioFootprint(footprint), &mut stats).await?;
        write_table(store, ctx, Materialized::UnreferencedAudio(unreferenced), &mut stats).await?;

        stats.duration = start.elapsed();
        info!(
            documents = documents.len(),
            media = media.len(),
            duration = ?stats.duration,
            "Storage analysis complete"
        );
        Ok(stats)
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn normalize_all(paths: HashSet<String>) -> HashSet<String> {
    paths.iter().map(|p| normalize(p)).collect()
}

pub fn compute_storage_summary(documents: &[FileEntry]) -> StorageSummary {
    let mut summary = StorageSummary::default();
    for doc in documents {
        summary.total_bytes += doc.size;
        summary.total_count += 1;
        if !is_backup_path(&doc.path) {
            summary.non_backup_bytes += doc.size;
            summary.non_backup_count += 1;
        }
    }
    summary
}

/// Non-backup documents modified inside each trailing window.
pub fn compute_activity(documents: &[FileEntry], windows: &[u32], now: i64) -> Vec<ActivityWindow> {
    windows
        .iter()
        .map(|&days| {
            let cutoff = now - i64::from(days) * SECONDS_PER_DAY;
            let (doc_count, bytes) = documents
                .iter()
                .filter(|d| d.mtime >= cutoff && !is_backup_path(&d.path))
                .fold((0u64, 0u64), |(n, b), d| (n + 1, b + d.size));
            ActivityWindow {
                window_days: days,
                doc_count,
                bytes,
            }
        })
        .collect()
}

/// The `top` largest non-backup documents.
pub fn compute_largest_sets(documents: &[FileEntry], top: usize) -> Vec<SetSize> {
    let mut sets: Vec<SetSize> = documents
        .iter()
        .filter(|d| !is_backup_path(&d.path))
        .map(|d| SetSize {
            path: d.path.clone(),
            size: d.size,
            mtime: d.mtime,
        })
        .collect();
    sets.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    sets.truncate(top);
    sets
}

/// Media byte totals split by whether any sample reference names the file.
pub fn compute_audio_footprint(media: &[FileEntry], referenced: &HashSet<String>) -> AudioFootprint {
    let mut footprint = AudioFootprint::default();
    for file in media {
        footprint.total_bytes += file.size;
        footprint.total_count += 1;
        if referenced.contains(&normalize(&file.path)) {
            footprint.referenced_bytes += file.size;
            footprint.referenced_count += 1;
        } else {
            footprint.unreferenced_bytes += file.size;
            footprint.unreferenced_count += 1;
        }
    }
    footprint
}

/// Unreferenced media grouped by parent directory, largest first.
pub fn compute_unreferenced_by_dir(
    media: &[FileEntry],
    referenced: &HashSet<String>,
) -> Vec<UnreferencedDir> {
    let mut dirs: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for file in media {
        if referenced.contains(&normalize(&file.path)) {
            continue;
        }
        let entry = dirs.entry(parent_directory(&file.path)).or_default();
        entry.0 += 1;
        entry.1 += file.size;
    }
    let mut rows: Vec<UnreferencedDir> = dirs
        .into_iter()
        .map(|(directory, (file_count, bytes))| UnreferencedDir {
            directory: directory.to_string(),
            file_count,
            bytes,
        })
        .collect();
    rows.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.directory.cmp(&b.directory)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scope;

    fn entry(path: &str, kind: FileKind, size: u64, mtime: i64) -> FileEntry {
        FileEntry {
            path: path.into(),
            scope: Scope::default(),
            ext: path.rsplit('.').next().unwrap_or_default().into(),
            kind,
            size,
            mtime,
            scanned_at: mtime,
            content_hash: None,
        }
    }

    #[test]
    fn footprint_splits_referenced_and_unreferenced() {
        let media = vec![
            entry("/lib/a.wav", FileKind::Media, 100, 0),
            entry("/lib/b.wav", FileKind::Media, 200, 0),
        ];
        let referenced = HashSet::from(["/lib/a.wav".to_string()]);
        let footprint = compute_audio_footprint(&media, &referenced);
        assert_eq!(footprint.total_bytes, 300);
        assert_eq!(footprint.referenced_bytes, 100);
        assert_eq!(footprint.unreferenced_bytes, 200);
        assert_eq!(footprint.referenced_count, 1);
        assert_eq!(footprint.unreferenced_count, 1);
    }

    #[test]
    fn referenced_match_ignores_separator_style() {
        let media = vec![entry("C:/lib/a.wav", FileKind::Media, 10, 0)];
        let referenced = normalize_all(HashSet::from(["C:\\lib\\a.wav".to_string()]));
        assert_eq!(compute_audio_footprint(&media, &referenced).referenced_count, 1);
    }

    #[test]
    fn unreferenced_groups_by_directory() {
        let media = vec![
            entry("/lib/loops/a.wav", FileKind::Media, 10, 0),
            entry("/lib/loops/b.wav", FileKind::Media, 30, 0),
            entry("/lib/oneshots/c.wav", FileKind::Media, 5, 0),
            entry("/lib/used/d.wav", FileKind::Media, 500, 0),
        ];
        let referenced = HashSet::from(["/lib/used/d.wav".to_string()]);
        let rows = compute_unreferenced_by_dir(&media, &referenced);
        assert_eq!(
            rows,
            vec![
                UnreferencedDir {
                    directory: "/lib/loops".into(),
                    file_count: 2,
                    bytes: 40
                },
                UnreferencedDir {
                    directory: "/lib/oneshots".into(),
                    file_count: 1,
                    bytes: 5
                },
            ]
        );
    }

    #[test]
    fn summary_separates_backups() {
        let docs = vec![
            entry("/p/Song.als", FileKind::Document, 1_000, 0),
            entry("/p/Backup/Song [2024-01-01 120000].als", FileKind::Document, 900, 0),
        ];
        let summary = compute_storage_summary(&docs);
        assert_eq!(summary.total_bytes, 1_900);
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.non_backup_bytes, 1_000);
        assert_eq!(summary.non_backup_count, 1);
    }

    #[test]
    fn activity_counts_recent_documents() {
        let now = 400 * SECONDS_PER_DAY;
        let docs = vec![
            entry("/p/new.als", FileKind::Document, 10, now - SECONDS_PER_DAY),
            entry("/p/month.als", FileKind::Document, 20, now - 20 * SECONDS_PER_DAY),
            entry("/p/old.als", FileKind::Document, 40, now - 200 * SECONDS_PER_DAY),
        ];
        let windows = compute_activity(&docs, &[7, 30, 90], now);
        let counts: Vec<(u32, u64, u64)> = windows
            .iter()
            .map(|w| (w.window_days, w.doc_count, w.bytes))
            .collect();
        assert_eq!(counts, vec![(7, 1, 10), (30, 2, 30), (90, 2, 30)]);
    }

    #[test]
    fn largest_sets_skip_backups_and_truncate() {
        let docs = vec![
            entry("/p/a.als", FileKind::Document, 5, 0),
            entry("/p/b.als", FileKind::Document, 50, 0),
            entry("/p/Backup/b.als", FileKind::Document, 500, 0),
            entry("/p/c.als", FileKind::Document, 25, 0),
        ];
        let top = compute_largest_sets(&docs, 2);
        let paths: Vec<&str> = top.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/p/b.als", "/p/c.als"]);
    }
}

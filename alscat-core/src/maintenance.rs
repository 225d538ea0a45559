//! Catalog upkeep: statistics refresh, compaction, pruning of vanished
//! files, and removal of snapshot artifacts.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::ScanError;
use crate::scan::snapshot::{self, DOCUMENTS, FILE_INDEX, REFS_GRAPH, SCAN_STATE, SCAN_SUMMARY};
use crate::store::CatalogStore;
use crate::store::sqlite::db_file_size;
use crate::types::Scope;

#[derive(Debug, Clone, Default)]
pub struct MaintainOptions {
    /// Run `VACUUM` after optimizing.
    pub vacuum: bool,
    /// Remove file rows whose path no longer exists.
    pub prune_missing: bool,
    /// Restrict pruning to one scope.
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintainReport {
    pub size_before: u64,
    pub size_after: u64,
    pub pruned_files: u64,
    pub removed_rows: u64,
    pub vacuumed: bool,
    pub duration_secs: f64,
}

/// Refresh planner statistics, optionally prune and vacuum, and report the
/// database size before and after.
#[instrument(skip_all, name = "maintain", fields(db = %db_path.display()))]
pub async fn maintain(
    store: &dyn CatalogStore,
    db_path: &Path,
    options: &MaintainOptions,
) -> crate::error::Result<MaintainReport> {
    let start = Instant::now();
    let size_before = db_file_size(db_path);

    let (pruned_files, removed_rows) = if options.prune_missing {
        prune_missing_files(store, options.scope.as_ref()).await?
    } else {
        (0, 0)
    };

    store.optimize().await?;
    if options.vacuum {
        store.compact().await?;
    }

    let report = MaintainReport {
        size_before,
        size_after: db_file_size(db_path),
        pruned_files,
        removed_rows,
        vacuumed: options.vacuum,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    info!(
        size_before = report.size_before,
        size_after = report.size_after,
        pruned = report.pruned_files,
        duration = ?start.elapsed(),
        "Maintenance complete"
    );
    Ok(report)
}

/// Remove catalog rows for files that no longer exist on disk.
///
/// Returns `(files pruned, rows removed across all tables)`.
pub async fn prune_missing_files(
    store: &dyn CatalogStore,
    scope: Option<&Scope>,
) -> crate::error::Result<(u64, u64)> {
    let mut gone: Vec<String> = store
        .file_paths(scope)
        .await?
        .into_iter()
        .filter(|p| !Path::new(p).exists())
        .collect();
    // The same path may be indexed under several scopes.
    gone.dedup();
    if gone.is_empty() {
        return Ok((0, 0));
    }
    for path in &gone {
        debug!(path = %path, "Pruning vanished file");
    }
    let removed = store.remove_paths(scope, &gone).await?;
    Ok((gone.len() as u64, removed))
}

/// Which snapshot artifacts `clean_snapshots` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct CleanTargets {
    pub snapshots: bool,
    pub state: bool,
    pub summary: bool,
}

impl Default for CleanTargets {
    fn default() -> Self {
        Self {
            snapshots: true,
            state: true,
            summary: true,
        }
    }
}

impl CleanTargets {
    fn file_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.snapshots {
            names.extend([FILE_INDEX, DOCUMENTS, REFS_GRAPH]);
        }
        if self.state {
            names.push(SCAN_STATE);
        }
        if self.summary {
            names.push(SCAN_SUMMARY);
        }
        names
    }
}

/// Delete the selected artifacts of `scope` under `snapshot_root`.
///
/// Returns the files removed; absent files are not an error. The scope
/// directory itself is removed once empty.
pub fn clean_snapshots(
    snapshot_root: &Path,
    scope: &Scope,
    targets: CleanTargets,
) -> Result<Vec<PathBuf>, ScanError> {
    let dir = snapshot::scope_dir(snapshot_root, scope);
    let mut removed = Vec::new();
    if !dir.is_dir() {
        return Ok(removed);
    }
    for name in targets.file_names() {
        let path = dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    if std::fs::read_dir(&dir)?.next().is_none() {
        std::fs::remove_dir(&dir)?;
    }
    info!(scope = %scope, removed = removed.len(), "Snapshot artifacts cleaned");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteCatalog;
    use crate::types::{FileKind, FileRecord};

    fn record(path: &Path) -> FileRecord {
        FileRecord {
            path: path.display().to_string(),
            path_hash: "h".into(),
            ext: "als".into(),
            size: 3,
            mtime: 1,
            ctime: None,
            name: "x.als".into(),
            parent: String::new(),
            mime: None,
            kind: FileKind::Document,
            scanned_at: 1,
            scope: Scope::default(),
            content_hash: None,
            hash_error: None,
            audio: None,
        }
    }

    #[tokio::test]
    async fn prune_removes_only_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.als");
        let gone = dir.path().join("gone.als");
        std::fs::write(&kept, b"x").unwrap();

        let store = SqliteCatalog::in_memory().unwrap();
        store
            .upsert_files(&[record(&kept), record(&gone)])
            .await
            .unwrap();

        let (files, rows) = prune_missing_files(&store, None).await.unwrap();
        assert_eq!(files, 1);
        assert!(rows >= 1);
        assert_eq!(
            store.file_paths(None).await.unwrap(),
            vec![kept.display().to_string()]
        );
    }

    #[tokio::test]
    async fn maintain_reports_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("catalog.sqlite");
        let store = SqliteCatalog::open(&db).unwrap();
        let report = maintain(
            &store,
            &db,
            &MaintainOptions {
                vacuum: true,
                ..MaintainOptions::default()
            },
        )
        .await
        .unwrap();
        assert!(report.size_before > 0);
        assert!(report.size_after > 0);
        assert!(report.vacuumed);
        assert_eq!(report.pruned_files, 0);
    }

    #[test]
    fn clean_removes_selected_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let scope = Scope::default();
        let dir = snapshot::scope_dir(root.path(), &scope);
        std::fs::create_dir_all(&dir).unwrap();
        for name in [FILE_INDEX, DOCUMENTS, REFS_GRAPH, SCAN_STATE, SCAN_SUMMARY] {
            std::fs::write(dir.join(name), b"{}").unwrap();
        }

        let removed = clean_snapshots(
            root.path(),
            &scope,
            CleanTargets {
                snapshots: true,
                state: false,
                summary: false,
            },
        )
        .unwrap();
        assert_eq!(removed.len(), 3);
        assert!(dir.join(SCAN_STATE).exists());

        let removed = clean_snapshots(root.path(), &scope, CleanTargets::default()).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!dir.exists());
    }

    #[test]
    fn clean_missing_scope_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let removed =
            clean_snapshots(root.path(), &Scope::default(), CleanTargets::default()).unwrap();
        assert!(removed.is_empty());
    }
}

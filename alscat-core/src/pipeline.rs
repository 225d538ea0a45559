// Update pipeline: scan -> append-ingest -> recompute analytics.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tracing::{info, instrument};

use crate::analyze::{self, ScopeAnalysis};
use crate::config::CatalogConfig;
use crate::ingest::{self, IngestMode, IngestOptions, IngestReport};
use crate::progress::ProgressReporter;
use crate::scan::{self, ScanOptions, ScanSummary};
use crate::types::Scope;

/// Everything one `update` run did.
#[derive(Debug)]
pub struct UpdateReport {
    pub scan: ScanSummary,
    pub ingest: IngestReport,
    pub analysis: Vec<ScopeAnalysis>,
}

/// Scan `root` into the catalog directory's snapshots for `scope`, ingest
/// the new snapshot bytes, and recompute that scope's analytics.
///
/// A missing database is created; an existing one is appended to.
#[instrument(skip_all, name = "update", fields(scope = %scope, root = %root.display()))]
pub async fn update(
    catalog_dir: &Path,
    root: &Path,
    scope: &Scope,
    config: &CatalogConfig,
    stop: Option<Arc<AtomicBool>>,
    progress: &dyn ProgressReporter,
) -> crate::error::Result<UpdateReport> {
    let start = Instant::now();
    let snapshot_dir = CatalogConfig::snapshot_dir(catalog_dir);

    let summary = scan::scan_to_snapshot(
        root,
        &snapshot_dir,
        scope,
        ScanOptions::from(&config.scan),
        stop,
        progress,
    )?;

    let db_path = config.db_path(catalog_dir);
    let mode = if db_path.exists() {
        IngestMode::Append
    } else {
        IngestMode::Fresh
    };
    let store = ingest::open_catalog(&db_path, mode).await?;
    let options = IngestOptions {
        mode,
        batch_size: config.ingest.batch_size,
        vacuum: false,
    };
    let report = ingest::ingest(
        &store,
        &snapshot_dir,
        std::slice::from_ref(scope),
        &options,
        progress,
    )
    .await?;

    let analysis = analyze::recompute(
        &store,
        std::slice::from_ref(scope),
        &config.analytics,
        chrono::Utc::now().timestamp(),
    )
    .await?;

    info!(
        indexed = summary.indexed,
        ingested_files = report.total_files(),
        duration = ?start.elapsed(),
        "Update complete"
    );
    Ok(UpdateReport {
        scan: summary,
        ingest: report,
        analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopReporter;
    use crate::store::CatalogStore;

    #[tokio::test]
    async fn update_twice_appends_without_duplicates() {
        let root = tempfile::tempdir().unwrap();
        let catalog = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("notes.adg"), b"rack").unwrap();
        let config = CatalogConfig::default();
        let scope = Scope::default();

        let first = update(catalog.path(), root.path(), &scope, &config, None, &NoopReporter)
            .await
            .unwrap();
        assert_eq!(first.scan.indexed, 1);
        assert_eq!(first.ingest.total_files(), 1);
        assert!(first.analysis[0].stats.errors.is_empty());

        std::fs::write(root.path().join("second.adg"), b"rack two").unwrap();
        let second = update(catalog.path(), root.path(), &scope, &config, None, &NoopReporter)
            .await
            .unwrap();
        assert_eq!(second.scan.indexed, 1);
        assert_eq!(second.scan.skipped, 1);
        assert_eq!(second.ingest.total_files(), 1);

        let store = crate::store::SqliteCatalog::open(&config.db_path(catalog.path())).unwrap();
        assert_eq!(store.stats(None).await.unwrap().total_files, 2);
    }

    #[tokio::test]
    async fn update_rejects_missing_root() {
        let catalog = tempfile::tempdir().unwrap();
        let err = update(
            catalog.path(),
            &catalog.path().join("absent"),
            &Scope::default(),
            &CatalogConfig::default(),
            None,
            &NoopReporter,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::CatalogError::Scan(crate::error::ScanError::InvalidRoot(_))
        ));
    }
}

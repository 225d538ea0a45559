//! Loads scanner snapshots into the catalog.
//!
//! One invocation is one `BEGIN IMMEDIATE` transaction, including the table
//! reset of a rebuild. Each batch of `batch_size` records is written in its
//! own savepoint; any failure rolls the whole invocation back.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::error::IngestError;
use crate::progress::ProgressReporter;
use crate::scan::ScanState;
use crate::scan::snapshot::{self, SnapshotReader};
use crate::store::{CatalogStore, IngestCursor, SqliteCatalog};
use crate::types::{DocumentRecord, FileRecord, RefEdge, Scope};

/// `catalog_meta` key holding the unix time of the last successful ingest.
pub const LAST_INGEST_KEY: &str = "last_ingest_at";

/// How an invocation treats an existing catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Create a new catalog; refuse if one already exists.
    #[default]
    Fresh,
    /// Merge new snapshot bytes onto the existing catalog.
    Append,
    /// Drop and recreate every table, then load everything.
    Rebuild,
}

impl IngestMode {
    /// Resolve command-line style flags into a mode.
    pub fn from_flags(overwrite: bool, append: bool) -> Result<Self, IngestError> {
        match (overwrite, append) {
            (true, true) => Err(IngestError::ModeConflict(
                "overwrite and append cannot be combined".into(),
            )),
            (true, false) => Ok(Self::Rebuild),
            (false, true) => Ok(Self::Append),
            (false, false) => Ok(Self::Fresh),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub mode: IngestMode,
    /// Rows per savepoint.
    pub batch_size: usize,
    /// Run `VACUUM` after a successful commit.
    pub vacuum: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            mode: IngestMode::Fresh,
            batch_size: 1000,
            vacuum: false,
        }
    }
}

/// Row counts for one ingested scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeIngest {
    pub scope: Scope,
    pub files: u64,
    pub documents: u64,
    pub references: u64,
    pub scan_state: u64,
    pub pruned_references: u64,
    pub catalog_docs: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub mode: String,
    pub scopes: Vec<ScopeIngest>,
    pub skipped_scopes: Vec<Scope>,
    pub vacuumed: bool,
    pub duration_secs: f64,
}

impl IngestReport {
    pub fn total_files(&self) -> u64 {
        self.scopes.iter().map(|s| s.files).sum()
    }

    pub fn total_documents(&self) -> u64 {
        self.scopes.iter().map(|s| s.documents).sum()
    }

    pub fn total_references(&self) -> u64 {
        self.scopes.iter().map(|s| s.references).sum()
    }
}

/// Open the catalog database for an ingest in `mode`.
///
/// `Fresh` refuses an existing file. A `Rebuild` catalog is reset by
/// [`ingest`] inside its transaction.
pub async fn open_catalog(db_path: &Path, mode: IngestMode) -> crate::error::Result<SqliteCatalog> {
    if mode == IngestMode::Fresh && db_path.exists() {
        return Err(IngestError::CatalogExists(db_path.to_path_buf()).into());
    }
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(IngestError::Io)?;
    }
    SqliteCatalog::open(db_path)
}

/// Ingest the snapshot directory for each of `scopes`.
///
/// Scopes without a snapshot directory are skipped; if none exists at all the
/// invocation fails with `MissingSnapshot`.
#[instrument(skip_all, name = "ingest", fields(dir = %snapshot_dir.display()))]
pub async fn ingest(
    store: &dyn CatalogStore,
    snapshot_dir: &Path,
    scopes: &[Scope],
    options: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> crate::error::Result<IngestReport> {
    let start = Instant::now();
    if !snapshot_dir.is_dir() {
        return Err(IngestError::MissingSnapshot(snapshot_dir.to_path_buf()).into());
    }

    let mut present = Vec::new();
    let mut skipped_scopes = Vec::new();
    for scope in scopes {
        if snapshot::scope_dir(snapshot_dir, scope).is_dir() {
            present.push(scope.clone());
        } else {
            debug!(scope = %scope, "No snapshot for scope");
            skipped_scopes.push(scope.clone());
        }
    }
    if present.is_empty() {
        return Err(IngestError::MissingSnapshot(snapshot_dir.to_path_buf()).into());
    }

    let batch_size = options.batch_size.max(1);
    progress.start("ingest", None);

    store.begin_transaction().await?;
    let mut outcome: crate::error::Result<()> = if options.mode == IngestMode::Rebuild {
        store
            .reset()
            .await
            .inspect(|_| info!("Catalog reset for rebuild"))
    } else {
        Ok(())
    };
    let mut scope_reports = Vec::with_capacity(present.len());
    for scope in &present {
        if outcome.is_err() {
            break;
        }
        match ingest_scope(store, snapshot_dir, scope, batch_size, progress).await {
            Ok(report) => scope_reports.push(report),
            Err(e) => outcome = Err(e),
        }
    }
    if outcome.is_ok() {
        outcome = store
            .set_meta(LAST_INGEST_KEY, &chrono::Utc::now().timestamp().to_string())
            .await;
    }

    if let Err(e) = outcome {
        warn!(error = %e, "Ingest failed, rolling back");
        if let Err(rollback) = store.rollback_transaction().await {
            warn!(error = %rollback, "Rollback failed");
        }
        progress.finish();
        return Err(e);
    }
    store.commit_transaction().await?;
    progress.finish();

    if options.vacuum {
        store.compact().await?;
    }

    let report = IngestReport {
        mode: format!("{:?}", options.mode).to_lowercase(),
        scopes: scope_reports,
        skipped_scopes,
        vacuumed: options.vacuum,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    info!(
        files = report.total_files(),
        documents = report.total_documents(),
        references = report.total_references(),
        duration = ?start.elapsed(),
        "Ingest complete"
    );
    Ok(report)
}

async fn ingest_scope(
    store: &dyn CatalogStore,
    snapshot_dir: &Path,
    scope: &Scope,
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> crate::error::Result<ScopeIngest> {
    let dir = snapshot::scope_dir(snapshot_dir, scope);
    let mut report = ScopeIngest {
        scope: scope.clone(),
        ..ScopeIngest::default()
    };

    report.files = load_source::<FileRecord>(store, &dir, scope, batch_size, progress).await?;
    report.documents =
        load_source::<DocumentRecord>(store, &dir, scope, batch_size, progress).await?;
    report.references = load_source::<RefEdge>(store, &dir, scope, batch_size, progress).await?;

    let state_path = dir.join(snapshot::SCAN_STATE);
    if state_path.exists() {
        let state = ScanState::load(&state_path).map_err(|e| IngestError::Malformed {
            path: state_path.clone(),
            line: 0,
            message: e.to_string(),
        })?;
        report.scan_state = store.replace_scan_state(scope, &state).await?;
    }

    report.pruned_references = store.prune_stale_references(scope).await?;
    report.catalog_docs = store.refresh_catalog_docs(scope).await?;

    debug!(
        scope = %scope,
        files = report.files,
        documents = report.documents,
        references = report.references,
        pruned = report.pruned_references,
        "Scope ingested"
    );
    Ok(report)
}

/// A snapshot record type and the store write that ingests it.
#[async_trait::async_trait]
trait SnapshotRecord: DeserializeOwned + Send + Sync + Sized {
    /// Snapshot file name inside a scope directory.
    const SOURCE: &'static str;

    async fn write(store: &dyn CatalogStore, batch: &[Self]) -> crate::error::Result<u64>;
}

#[async_trait::async_trait]
impl SnapshotRecord for FileRecord {
    const SOURCE: &'static str = snapshot::FILE_INDEX;

    async fn write(store: &dyn CatalogStore, batch: &[Self]) -> crate::error::Result<u64> {
        store.upsert_files(batch).await
    }
}

#[async_trait::async_trait]
impl SnapshotRecord for DocumentRecord {
    const SOURCE: &'static str = snapshot::DOCUMENTS;

    async fn write(store: &dyn CatalogStore, batch: &[Self]) -> crate::error::Result<u64> {
        store.upsert_documents(batch).await
    }
}

#[async_trait::async_trait]
impl SnapshotRecord for RefEdge {
    const SOURCE: &'static str = snapshot::REFS_GRAPH;

    async fn write(store: &dyn CatalogStore, batch: &[Self]) -> crate::error::Result<u64> {
        store.upsert_references(batch).await
    }
}

/// Stream one snapshot source from its stored offset in batches, then record
/// the new offset.
///
/// The stored offset only applies to the file it was taken from: when the
/// source's first line no longer matches, it was replaced and is read from
/// the start.
async fn load_source<T: SnapshotRecord>(
    store: &dyn CatalogStore,
    dir: &Path,
    scope: &Scope,
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> crate::error::Result<u64> {
    let path = dir.join(T::SOURCE);
    if !path.exists() {
        debug!(path = %path.display(), "Snapshot source absent");
        return Ok(0);
    }

    let stored = store.ingest_cursor(scope, T::SOURCE).await?;
    let head = snapshot::head_digest(&path)?;
    let offset = if stored.offset > 0 && stored.head_digest != head {
        warn!(path = %path.display(), "Snapshot replaced since last ingest; reading from start");
        0
    } else {
        stored.offset
    };
    let mut reader = SnapshotReader::open(&path, offset)?;
    if reader.offset() < offset {
        warn!(path = %path.display(), offset, "Snapshot shrank since last ingest; reading from start");
    }

    let mut total = 0u64;
    loop {
        let batch: Vec<T> = reader.next_batch(batch_size)?;
        if batch.is_empty() {
            break;
        }
        total += T::write(store, &batch).await?;
        progress.advance(batch.len() as u64);
    }

    let head_digest = match head {
        Some(digest) => Some(digest),
        None => snapshot::head_digest(&path)?,
    };
    let cursor = IngestCursor {
        offset: reader.offset(),
        head_digest,
    };
    store.set_ingest_cursor(scope, T::SOURCE, &cursor).await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::progress::NoopReporter;
    use crate::scan::{EventSink, SnapshotWriter};
    use alscat_doc::{DocumentParser, HeuristicParser};
    use crate::types::{FileKind, Fingerprint, RefKind, ScanEvent};

    fn file(path: &str, size: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            path_hash: "h".into(),
            ext: "als".into(),
            size,
            mtime: 1,
            ctime: None,
            name: "A.als".into(),
            parent: "/music".into(),
            mime: None,
            kind: FileKind::Document,
            scanned_at: 1,
            scope: Scope::default(),
            content_hash: None,
            hash_error: None,
            audio: None,
        }
    }

    fn write_events(out: &Path, events: Vec<ScanEvent>) {
        let mut writer = SnapshotWriter::open(&snapshot::scope_dir(out, &Scope::default())).unwrap();
        for event in events {
            writer.emit(event).unwrap();
        }
        writer.flush().unwrap();
    }

    fn options(mode: IngestMode) -> IngestOptions {
        IngestOptions {
            mode,
            batch_size: 2,
            vacuum: false,
        }
    }

    #[test]
    fn mode_flags_resolve() {
        assert_eq!(IngestMode::from_flags(false, false).unwrap(), IngestMode::Fresh);
        assert_eq!(IngestMode::from_flags(true, false).unwrap(), IngestMode::Rebuild);
        assert_eq!(IngestMode::from_flags(false, true).unwrap(), IngestMode::Append);
        assert!(matches!(
            IngestMode::from_flags(true, true),
            Err(IngestError::ModeConflict(_))
        ));
    }

    #[tokio::test]
    async fn reingesting_changed_record_keeps_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        write_events(&out, vec![ScanEvent::File(file("/music/A.als", 100))]);

        let store = SqliteCatalog::in_memory().unwrap();
        let scopes = [Scope::default()];
        ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();

        write_events(&out, vec![ScanEvent::File(file("/music/A.als", 250))]);
        let report = ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(report.total_files(), 1);

        let files = store.files(&Scope::default(), None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 250);
    }

    #[tokio::test]
    async fn append_reads_only_new_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        let records: Vec<ScanEvent> = (0..5)
            .map(|i| ScanEvent::File(file(&format!("/music/{i}.als"), i)))
            .collect();
        write_events(&out, records);

        let store = SqliteCatalog::in_memory().unwrap();
        let scopes = [Scope::default()];
        let first = ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(first.total_files(), 5);

        let second = ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(second.total_files(), 0);
        assert!(store.meta(LAST_INGEST_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_line_rolls_back_everything() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        write_events(
            &out,
            vec![
                ScanEvent::File(file("/music/A.als", 1)),
                ScanEvent::File(file("/music/B.als", 1)),
                ScanEvent::File(file("/music/C.als", 1)),
            ],
        );
        let scope_dir = snapshot::scope_dir(&out, &Scope::default());
        let mut text = std::fs::read_to_string(scope_dir.join(snapshot::FILE_INDEX)).unwrap();
        text.push_str("{\"path\": 7}\n");
        std::fs::write(scope_dir.join(snapshot::FILE_INDEX), text).unwrap();

        let store = SqliteCatalog::in_memory().unwrap();
        let err = ingest(
            &store,
            &out,
            &[Scope::default()],
            &options(IngestMode::Append),
            &NoopReporter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CatalogError::Ingest(IngestError::Malformed { line: 4, .. })));

        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(
            store
                .ingest_cursor(&Scope::default(), snapshot::FILE_INDEX)
                .await
                .unwrap()
                .offset,
            0
        );
    }

    #[tokio::test]
    async fn documents_refs_and_state_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        let summary = HeuristicParser.parse(
            r#"<AudioTrack/><Device DeviceName="Eq" /><Path Value="/s/missing.wav" />"#,
        );
        write_events(
            &out,
            vec![
                ScanEvent::File(file("/music/A.als", 10)),
                ScanEvent::Document(DocumentRecord::parsed(
                    "/music/A.als".into(),
                    "als".into(),
                    Scope::default(),
                    1,
                    summary,
                )),
                ScanEvent::Reference(RefEdge {
                    src: "/music/A.als".into(),
                    src_kind: "als".into(),
                    ref_kind: RefKind::Sample,
                    ref_path: "/s/missing.wav".into(),
                    exists: false,
                    scanned_at: 1,
                    scope: Scope::default(),
                }),
            ],
        );
        let mut state = ScanState::default();
        state.insert(
            "/music/A.als".into(),
            Fingerprint {
                size: 10,
                mtime: 1,
                content_hash: None,
            },
        );
        state
            .save(&snapshot::scope_dir(&out, &Scope::default()).join(snapshot::SCAN_STATE))
            .unwrap();

        let store = SqliteCatalog::in_memory().unwrap();
        let report = ingest(
            &store,
            &out,
            &[Scope::default(), Scope::new("user_library").unwrap()],
            &options(IngestMode::Append),
            &NoopReporter,
        )
        .await
        .unwrap();
        assert_eq!(report.scopes.len(), 1);
        assert_eq!(report.skipped_scopes, vec![Scope::new("user_library").unwrap()]);
        let scope = &report.scopes[0];
        assert_eq!(scope.documents, 1);
        assert_eq!(scope.references, 1);
        assert_eq!(scope.scan_state, 1);
        assert_eq!(scope.catalog_docs, 1);

        let metrics = store.document_metrics(&Scope::default()).await.unwrap();
        assert_eq!(metrics[0].missing_refs, 1);
        assert_eq!(metrics[0].devices_count, 1);
    }

    #[tokio::test]
    async fn fresh_refuses_existing_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("catalog.sqlite");
        drop(open_catalog(&db, IngestMode::Fresh).await.unwrap());
        let err = open_catalog(&db, IngestMode::Fresh).await.unwrap_err();
        assert!(matches!(err, CatalogError::Ingest(IngestError::CatalogExists(_))));
        assert!(open_catalog(&db, IngestMode::Append).await.is_ok());
    }

    #[tokio::test]
    async fn rebuild_starts_from_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        write_events(&out, vec![ScanEvent::File(file("/music/A.als", 1))]);
        let db = dir.path().join("catalog.sqlite");

        {
            let store = open_catalog(&db, IngestMode::Fresh).await.unwrap();
            store.upsert_files(&[file("/music/Stale.als", 1)]).await.unwrap();
            ingest(&store, &out, &[Scope::default()], &options(IngestMode::Fresh), &NoopReporter)
                .await
                .unwrap();
        }

        let store = open_catalog(&db, IngestMode::Rebuild).await.unwrap();
        let report = ingest(
            &store,
            &out,
            &[Scope::default()],
            &IngestOptions {
                mode: IngestMode::Rebuild,
                batch_size: 10,
                vacuum: true,
            },
            &NoopReporter,
        )
        .await
        .unwrap();
        assert!(report.vacuumed);
        assert_eq!(report.total_files(), 1);
        let paths = store.file_paths(None).await.unwrap();
        assert_eq!(paths, vec!["/music/A.als"]);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        write_events(&out, vec![ScanEvent::File(file("/music/A.als", 1))]);
        let db = dir.path().join("catalog.sqlite");
        {
            let store = open_catalog(&db, IngestMode::Fresh).await.unwrap();
            ingest(&store, &out, &[Scope::default()], &options(IngestMode::Fresh), &NoopReporter)
                .await
                .unwrap();
        }

        let index = snapshot::scope_dir(&out, &Scope::default()).join(snapshot::FILE_INDEX);
        let mut text = std::fs::read_to_string(&index).unwrap();
        text.push_str("{\"path\": 7}\n");
        std::fs::write(&index, text).unwrap();

        let store = open_catalog(&db, IngestMode::Rebuild).await.unwrap();
        let err = ingest(
            &store,
            &out,
            &[Scope::default()],
            &options(IngestMode::Rebuild),
            &NoopReporter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CatalogError::Ingest(IngestError::Malformed { line: 2, .. })));

        assert_eq!(store.stats(None).await.unwrap().total_files, 1);
        assert_eq!(store.file_paths(None).await.unwrap(), vec!["/music/A.als"]);
        assert!(store.meta(LAST_INGEST_KEY).await.unwrap().is_some());
        let cursor = store
            .ingest_cursor(&Scope::default(), snapshot::FILE_INDEX)
            .await
            .unwrap();
        assert!(cursor.offset > 0);
    }

    #[tokio::test]
    async fn replaced_snapshot_is_read_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snap");
        write_events(&out, vec![ScanEvent::File(file("/music/A.als", 1))]);

        let store = SqliteCatalog::in_memory().unwrap();
        let scopes = [Scope::default()];
        ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();

        std::fs::remove_dir_all(snapshot::scope_dir(&out, &Scope::default())).unwrap();
        write_events(
            &out,
            vec![
                ScanEvent::File(file("/music/B.als", 2)),
                ScanEvent::File(file("/music/C.als", 3)),
            ],
        );
        let report = ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(report.total_files(), 2);
        assert_eq!(
            store.file_paths(None).await.unwrap(),
            vec!["/music/A.als", "/music/B.als", "/music/C.als"]
        );

        // Appending to the new file resumes from its own offset.
        write_events(&out, vec![ScanEvent::File(file("/music/D.als", 4))]);
        let report = ingest(&store, &out, &scopes, &options(IngestMode::Append), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(report.total_files(), 1);
    }

    #[tokio::test]
    async fn missing_snapshot_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCatalog::in_memory().unwrap();
        let err = ingest(
            &store,
            &dir.path().join("nope"),
            &[Scope::default()],
            &IngestOptions::default(),
            &NoopReporter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CatalogError::Ingest(IngestError::MissingSnapshot(_))));
    }
}

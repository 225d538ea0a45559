use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;
use crate::scan::ScanState;
use crate::types::{
    CatalogStats, DocumentMetrics, DocumentRecord, FileEntry, FileKind, FileRecord, Materialized,
    RefEdge, Scope,
};

use super::schema;
use super::{CatalogStore, IngestCursor};

/// SQLite-backed implementation of `CatalogStore`.
#[derive(Debug)]
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteCatalog {
    /// Open (or create) a catalog at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory catalog (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory catalogs.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("catalog store mutex poisoned")
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;",
        )
        .map_err(StoreError::Sqlite)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StoreError::Sqlite)?;

        // WAL lets read-only query connections proceed during ingest;
        // silently ignored for in-memory catalogs.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        Self::create_schema(&conn).map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(schema::SCHEMA_SQL)?;

        let mut legacy = Vec::new();
        for table in schema::SCOPE_KEYED_TABLES {
            if !Self::keyed_by_scope(conn, table)? {
                legacy.push(*table);
            }
        }
        if !legacy.is_empty() {
            conn.execute_batch("SAVEPOINT rekey")?;
            for table in &legacy {
                conn.execute_batch(&format!("ALTER TABLE {table} RENAME TO {table}_v1"))?;
            }
            conn.execute_batch(schema::SCHEMA_SQL)?;
        }

        Self::migrate_columns(conn)?;

        if !legacy.is_empty() {
            for table in &legacy {
                Self::copy_legacy_rows(conn, table)?;
                tracing::info!(table, "Re-keyed catalog table by scope");
            }
            conn.execute_batch("RELEASE rekey")?;
        }

        conn.execute_batch(schema::INDEXES_SQL)?;
        conn.execute(
            "INSERT INTO catalog_meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![schema::SCHEMA_VERSION],
        )?;
        Ok(())
    }

    fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
        conn.prepare(&format!("PRAGMA table_info({table})"))?
            .query_map([], |row| row.get::<_, String>(1))?
            .collect()
    }

    /// Whether `table`'s primary key includes `scope`. Tables without a
    /// scope column count as keyed.
    fn keyed_by_scope(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
        let scope_pk = conn
            .prepare(&format!("PRAGMA table_info({table})"))?
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .find(|(name, _)| name == "scope")
            .map(|(_, pk)| pk);
        Ok(scope_pk.is_none_or(|pk| pk > 0))
    }

    /// Move rows from `<table>_v1` into the re-keyed table, then drop it.
    fn copy_legacy_rows(conn: &Connection, table: &str) -> rusqlite::Result<()> {
        let legacy = format!("{table}_v1");
        let current = Self::column_names(conn, table)?;
        let shared = Self::column_names(conn, &legacy)?
            .into_iter()
            .filter(|c| current.contains(c))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!(
            "INSERT OR REPLACE INTO {table} ({shared}) SELECT {shared} FROM {legacy};
             DROP TABLE {legacy};"
        ))
    }

    /// Add any declared column missing from an older catalog.
    fn migrate_columns(conn: &Connection) -> rusqlite::Result<()> {
        for (table, columns) in schema::ADDITIVE_COLUMNS {
            let existing: HashSet<String> = Self::column_names(conn, table)?.into_iter().collect();
            for (column, decl) in *columns {
                if !existing.contains(*column) {
                    conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
                    tracing::debug!(table, column, "Added catalog column");
                }
            }
        }
        Ok(())
    }

    fn db_size_bytes(&self) -> u64 {
        self.db_path.as_deref().map_or(0, db_file_size)
    }

    fn insert_materialized(
        conn: &Connection,
        scope: &str,
        table: &Materialized,
        at: i64,
    ) -> rusqlite::Result<()> {
        match table {
            Materialized::DeviceUsage(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO device_usage (scope, device, usage_count, doc_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.device, r.usage_count, r.doc_count, at])?;
                }
            }
            Materialized::DeviceChains(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO device_chain_stats (scope, chain, chain_len, usage_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.chain, r.chain_len, r.usage_count, at])?;
                }
            }
            Materialized::DeviceCooccurrence(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO device_cooccurrence (scope, device_a, device_b, count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.device_a, r.device_b, r.count, at])?;
                }
            }
            Materialized::DeviceUsageRecent(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO device_usage_recent (scope, window_days, device, doc_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.window_days, r.device, r.doc_count, at])?;
                }
            }
            Materialized::DocComplexity(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO doc_complexity
                        (scope, path, tracks_total, clips_total, devices_count, samples_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        scope,
                        r.path,
                        r.tracks_total,
                        r.clips_total,
                        r.devices_count,
                        r.samples_count,
                        at
                    ])?;
                }
            }
            Materialized::SetHealth(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO set_health
                        (scope, path, score, missing_refs, devices_count, samples_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        scope,
                        r.path,
                        r.score,
                        r.missing_refs,
                        r.devices_count,
                        r.samples_count,
                        at
                    ])?;
                }
            }
            Materialized::QualityIssues(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO quality_issues (scope, path, issue, issue_value, severity, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        scope,
                        r.path,
                        r.issue.as_str(),
                        r.issue_value,
                        r.severity,
                        at
                    ])?;
                }
            }
            Materialized::MissingHotspots(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO missing_refs_by_path (scope, directory, missing_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.directory, r.missing_count, at])?;
                }
            }
            Materialized::StorageSummary(s) => {
                conn.execute(
                    "INSERT INTO set_storage_summary
                        (scope, total_bytes, total_count, non_backup_bytes, non_backup_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        scope,
                        s.total_bytes,
                        s.total_count,
                        s.non_backup_bytes,
                        s.non_backup_count,
                        at
                    ],
                )?;
            }
            Materialized::ActivityWindows(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO set_activity_stats (scope, window_days, doc_count, bytes, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.window_days, r.doc_count, r.bytes, at])?;
                }
            }
            Materialized::SetSizeTop(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO set_size_top (scope, path, size, mtime, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.path, r.size, r.mtime, at])?;
                }
            }
            Materialized::AudioFootprint(f) => {
                conn.execute(
                    "INSERT INTO audio_footprint
                        (scope, total_bytes, total_count, referenced_bytes, referenced_count,
                         unreferenced_bytes, unreferenced_count, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        scope,
                        f.total_bytes,
                        f.total_count,
                        f.referenced_bytes,
                        f.referenced_count,
                        f.unreferenced_bytes,
                        f.unreferenced_count,
                        at
                    ],
                )?;
            }
            Materialized::UnreferencedAudio(rows) => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO unreferenced_audio_by_path (scope, directory, file_count, bytes, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![scope, r.directory, r.file_count, r.bytes, at])?;
                }
            }
        }
        Ok(())
    }
}

/// Group `(document, value)` rows, already ordered by document, into one
/// entry per document.
fn group_by_document(rows: Vec<(String, String)>) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (doc, value) in rows {
        match grouped.last_mut() {
            Some((last, values)) if *last == doc => values.push(value),
            _ => grouped.push((doc, vec![value])),
        }
    }
    grouped
}

#[async_trait::async_trait]
impl CatalogStore for SqliteCatalog {
    // ── Ingest writes ──────────────────────────────────────────────

    async fn upsert_files(&self, files: &[FileRecord]) -> crate::error::Result<u64> {
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        {
            let mut stmt = sp
                .prepare_cached(
                    "INSERT INTO file_index (
                        path, scope, path_hash, ext, size, mtime, ctime, name, parent, mime,
                        kind, scanned_at, content_hash, hash_error, audio_codec, duration_secs,
                        sample_rate, channels, bit_depth)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                             ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                     ON CONFLICT(scope, path) DO UPDATE SET
                        path_hash = excluded.path_hash,
                        ext = excluded.ext,
                        size = excluded.size,
                        mtime = excluded.mtime,
                        ctime = excluded.ctime,
                        name = excluded.name,
                        parent = excluded.parent,
                        mime = excluded.mime,
                        kind = excluded.kind,
                        scanned_at = excluded.scanned_at,
                        content_hash = excluded.content_hash,
                        hash_error = excluded.hash_error,
                        audio_codec = excluded.audio_codec,
                        duration_secs = excluded.duration_secs,
                        sample_rate = excluded.sample_rate,
                        channels = excluded.channels,
                        bit_depth = excluded.bit_depth",
                )
                .map_err(StoreError::Sqlite)?;
            for f in files {
                let audio = f.audio.as_ref();
                stmt.execute(params![
                    f.path,
                    f.scope.as_str(),
                    f.path_hash,
                    f.ext,
                    f.size,
                    f.mtime,
                    f.ctime,
                    f.name,
                    f.parent,
                    f.mime,
                    f.kind.as_str(),
                    f.scanned_at,
                    f.content_hash,
                    f.hash_error,
                    audio.map(|a| a.codec.as_str()),
                    audio.and_then(|a| a.duration_secs),
                    audio.and_then(|a| a.sample_rate),
                    audio.and_then(|a| a.channels),
                    audio.and_then(|a| a.bit_depth),
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(files.len() as u64)
    }

    async fn upsert_documents(&self, docs: &[DocumentRecord]) -> crate::error::Result<u64> {
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        {
            let mut doc_stmt = sp
                .prepare_cached(
                    "INSERT OR REPLACE INTO documents (
                        path, scope, ext, scanned_at, tempo,
                        tracks_audio, tracks_midi, tracks_return, tracks_master, tracks_total,
                        clips_audio, clips_midi, clips_total, error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                .map_err(StoreError::Sqlite)?;
            let mut sample_stmt = sp
                .prepare_cached(
                    "INSERT OR IGNORE INTO doc_sample_refs (doc_path, sample_path, scope)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(StoreError::Sqlite)?;
            let mut hint_stmt = sp
                .prepare_cached(
                    "INSERT OR IGNORE INTO doc_device_hints (doc_path, device, scope)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(StoreError::Sqlite)?;
            let mut seq_stmt = sp
                .prepare_cached(
                    "INSERT INTO doc_device_sequence (doc_path, position, device, scope)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(StoreError::Sqlite)?;

            for doc in docs {
                let scope = doc.scope.as_str();
                for table in ["doc_sample_refs", "doc_device_hints", "doc_device_sequence"] {
                    sp.execute(
                        &format!("DELETE FROM {table} WHERE scope = ?1 AND doc_path = ?2"),
                        params![scope, doc.path],
                    )
                    .map_err(StoreError::Sqlite)?;
                }

                let summary = doc.summary.clone().unwrap_or_default();
                doc_stmt
                    .execute(params![
                        doc.path,
                        scope,
                        doc.ext,
                        doc.scanned_at,
                        summary.tempo,
                        summary.tracks.audio,
                        summary.tracks.midi,
                        summary.tracks.returns,
                        summary.tracks.master,
                        summary.tracks.total,
                        summary.clips.audio,
                        summary.clips.midi,
                        summary.clips.total,
                        doc.error,
                    ])
                    .map_err(StoreError::Sqlite)?;

                for sample in &summary.sample_refs {
                    sample_stmt
                        .execute(params![doc.path, sample, scope])
                        .map_err(StoreError::Sqlite)?;
                }
                for hint in &summary.device_hints {
                    hint_stmt
                        .execute(params![doc.path, hint, scope])
                        .map_err(StoreError::Sqlite)?;
                }
                for (position, device) in summary.device_sequence.iter().enumerate() {
                    seq_stmt
                        .execute(params![doc.path, position as u64, device, scope])
                        .map_err(StoreError::Sqlite)?;
                }
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(docs.len() as u64)
    }

    async fn upsert_references(&self, edges: &[RefEdge]) -> crate::error::Result<u64> {
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        {
            let mut stmt = sp
                .prepare_cached(
                    "INSERT INTO refs_graph (src, ref_kind, ref_path, scope, src_kind, exists_flag, scanned_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(scope, src, ref_kind, ref_path) DO UPDATE SET
                        src_kind = excluded.src_kind,
                        exists_flag = excluded.exists_flag,
                        scanned_at = excluded.scanned_at",
                )
                .map_err(StoreError::Sqlite)?;
            for e in edges {
                stmt.execute(params![
                    e.src,
                    e.ref_kind.as_str(),
                    e.ref_path,
                    e.scope.as_str(),
                    e.src_kind,
                    e.exists,
                    e.scanned_at,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(edges.len() as u64)
    }

    async fn prune_stale_references(&self, scope: &Scope) -> crate::error::Result<u64> {
        let conn = self.lock();
        let removed = conn
            .execute(
                "DELETE FROM refs_graph
                 WHERE scope = ?1
                   AND EXISTS (
                       SELECT 1 FROM documents d
                       WHERE d.scope = refs_graph.scope
                         AND d.path = refs_graph.src
                         AND d.scanned_at > refs_graph.scanned_at
                   )",
                params![scope.as_str()],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(removed as u64)
    }

    async fn replace_scan_state(
        &self,
        scope: &Scope,
        state: &ScanState,
    ) -> crate::error::Result<u64> {
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        sp.execute(
            "DELETE FROM scan_state WHERE scope = ?1",
            params![scope.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        {
            let mut stmt = sp
                .prepare_cached(
                    "INSERT OR REPLACE INTO scan_state (path, scope, size, mtime, content_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StoreError::Sqlite)?;
            for (path, fp) in state.iter() {
                stmt.execute(params![path, scope.as_str(), fp.size, fp.mtime, fp.content_hash])
                    .map_err(StoreError::Sqlite)?;
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(state.len() as u64)
    }

    async fn refresh_catalog_docs(&self, scope: &Scope) -> crate::error::Result<u64> {
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        sp.execute(
            "DELETE FROM catalog_docs WHERE scope = ?1",
            params![scope.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        let inserted = sp
            .execute(
                "INSERT INTO catalog_docs (
                    path, scope, name, size, mtime, tempo, tracks_total, clips_total,
                    devices_count, samples_count, missing_refs, error, scanned_at)
                 SELECT
                    d.path, d.scope, COALESCE(f.name, d.path), COALESCE(f.size, 0),
                    COALESCE(f.mtime, 0), d.tempo, d.tracks_total, d.clips_total,
                    (SELECT COUNT(*) FROM doc_device_hints h
                     WHERE h.scope = d.scope AND h.doc_path = d.path),
                    (SELECT COUNT(*) FROM doc_sample_refs s
                     WHERE s.scope = d.scope AND s.doc_path = d.path),
                    (SELECT COUNT(*) FROM refs_graph r
                     WHERE r.scope = d.scope AND r.src = d.path AND r.exists_flag = 0),
                    d.error, d.scanned_at
                 FROM documents d
                 LEFT JOIN file_index f ON f.scope = d.scope AND f.path = d.path
                 WHERE d.scope = ?1",
                params![scope.as_str()],
            )
            .map_err(StoreError::Sqlite)?;
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(inserted as u64)
    }

    async fn ingest_cursor(
        &self,
        scope: &Scope,
        source: &str,
    ) -> crate::error::Result<IngestCursor> {
        let conn = self.lock();
        let cursor = conn
            .query_row(
                "SELECT byte_offset, head_digest FROM ingest_state
                 WHERE scope = ?1 AND source = ?2",
                params![scope.as_str(), source],
                |row| {
                    Ok(IngestCursor {
                        offset: row.get(0)?,
                        head_digest: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(cursor.unwrap_or_default())
    }

    async fn set_ingest_cursor(
        &self,
        scope: &Scope,
        source: &str,
        cursor: &IngestCursor,
    ) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO ingest_state (scope, source, byte_offset, head_digest, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(scope, source) DO UPDATE SET
                byte_offset = excluded.byte_offset,
                head_digest = excluded.head_digest,
                updated_at = excluded.updated_at",
            params![
                scope.as_str(),
                source,
                cursor.offset,
                cursor.head_digest,
                chrono::Utc::now().timestamp()
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Analytics reads ────────────────────────────────────────────

    async fn device_sequences(
        &self,
        scope: &Scope,
    ) -> crate::error::Result<Vec<(String, Vec<String>)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT doc_path, device FROM doc_device_sequence
                 WHERE scope = ?1 ORDER BY doc_path, position",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![scope.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(group_by_document(rows))
    }

    async fn device_hints(&self, scope: &Scope) -> crate::error::Result<Vec<(String, Vec<String>)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT doc_path, device FROM doc_device_hints
                 WHERE scope = ?1 ORDER BY doc_path, device",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![scope.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(group_by_document(rows))
    }

    async fn document_metrics(&self, scope: &Scope) -> crate::error::Result<Vec<DocumentMetrics>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT d.path, COALESCE(f.size, 0), COALESCE(f.mtime, 0),
                        d.tracks_total, d.clips_total,
                        (SELECT COUNT(*) FROM doc_device_hints h
                         WHERE h.scope = d.scope AND h.doc_path = d.path),
                        (SELECT COUNT(*) FROM doc_sample_refs s
                         WHERE s.scope = d.scope AND s.doc_path = d.path),
                        (SELECT COUNT(*) FROM refs_graph r
                         WHERE r.scope = d.scope AND r.src = d.path AND r.exists_flag = 0),
                        d.error
                 FROM documents d
                 LEFT JOIN file_index f ON f.scope = d.scope AND f.path = d.path
                 WHERE d.scope = ?1
                 ORDER BY d.path",
            )
            .map_err(StoreError::Sqlite)?;
        let metrics = stmt
            .query_map(params![scope.as_str()], |row| {
                Ok(DocumentMetrics {
                    path: row.get(0)?,
                    size: row.get(1)?,
                    mtime: row.get(2)?,
                    tracks_total: row.get(3)?,
                    clips_total: row.get(4)?,
                    devices_count: row.get(5)?,
                    samples_count: row.get(6)?,
                    missing_refs: row.get(7)?,
                    error: row.get(8)?,
                })
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(metrics)
    }

    async fn missing_references(&self, scope: &Scope) -> crate::error::Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ref_path FROM refs_graph
                 WHERE scope = ?1 AND exists_flag = 0 ORDER BY ref_path",
            )
            .map_err(StoreError::Sqlite)?;
        let targets = stmt
            .query_map(params![scope.as_str()], |row| row.get(0))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(targets)
    }

    async fn files(
        &self,
        scope: &Scope,
        kind: Option<FileKind>,
    ) -> crate::error::Result<Vec<FileEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT path, ext, kind, size, mtime, scanned_at, content_hash
                 FROM file_index
                 WHERE scope = ?1 AND (?2 IS NULL OR kind = ?2)
                 ORDER BY path",
            )
            .map_err(StoreError::Sqlite)?;
        let files = stmt
            .query_map(params![scope.as_str(), kind.map(FileKind::as_str)], |row| {
                let kind: String = row.get(2)?;
                Ok(FileEntry {
                    path: row.get(0)?,
                    scope: scope.clone(),
                    ext: row.get(1)?,
                    kind: FileKind::parse(&kind).unwrap_or(FileKind::Other),
                    size: row.get(3)?,
                    mtime: row.get(4)?,
                    scanned_at: row.get(5)?,
                    content_hash: row.get(6)?,
                })
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(files)
    }

    async fn referenced_samples(&self) -> crate::error::Result<HashSet<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT ref_path FROM refs_graph WHERE ref_kind = 'sample'")
            .map_err(StoreError::Sqlite)?;
        let targets = stmt
            .query_map([], |row| row.get(0))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<HashSet<String>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(targets)
    }

    // ── Analytics writes ───────────────────────────────────────────

    async fn replace_materialized(
        &self,
        scope: &Scope,
        table: &Materialized,
        computed_at: i64,
    ) -> crate::error::Result<()> {
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        sp.execute(
            &format!("DELETE FROM {} WHERE scope = ?1", table.table()),
            params![scope.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        Self::insert_materialized(&sp, scope.as_str(), table, computed_at)
            .map_err(StoreError::Sqlite)?;
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Maintenance ────────────────────────────────────────────────

    async fn file_paths(&self, scope: Option<&Scope>) -> crate::error::Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT path FROM file_index WHERE (?1 IS NULL OR scope = ?1) ORDER BY path")
            .map_err(StoreError::Sqlite)?;
        let paths = stmt
            .query_map(params![scope.map(Scope::as_str)], |row| row.get(0))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(paths)
    }

    async fn remove_paths(
        &self,
        scope: Option<&Scope>,
        paths: &[String],
    ) -> crate::error::Result<u64> {
        const DEPENDENTS: &[(&str, &str)] = &[
            ("documents", "path"),
            ("doc_sample_refs", "doc_path"),
            ("doc_device_hints", "doc_path"),
            ("doc_device_sequence", "doc_path"),
            ("refs_graph", "src"),
            ("scan_state", "path"),
            ("catalog_docs", "path"),
        ];

        let scope = scope.map(Scope::as_str);
        let mut conn = self.lock();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        let mut removed = 0u64;
        for path in paths {
            removed += sp
                .execute(
                    "DELETE FROM file_index WHERE path = ?1 AND (?2 IS NULL OR scope = ?2)",
                    params![path, scope],
                )
                .map_err(StoreError::Sqlite)? as u64;
            for (table, column) in DEPENDENTS {
                sp.execute(
                    &format!("DELETE FROM {table} WHERE {column} = ?1 AND (?2 IS NULL OR scope = ?2)"),
                    params![path, scope],
                )
                .map_err(StoreError::Sqlite)?;
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(removed)
    }

    async fn reset(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        for table in schema::ALL_TABLES {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
                .map_err(StoreError::Sqlite)?;
        }
        Self::create_schema(&conn).map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn optimize(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute_batch("ANALYZE; PRAGMA optimize;")
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn compact(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute_batch("VACUUM;").map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Metadata ───────────────────────────────────────────────────

    async fn meta(&self, key: &str) -> crate::error::Result<Option<String>> {
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM catalog_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO catalog_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Transactions ──────────────────────────────────────────────

    async fn begin_transaction(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn commit_transaction(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute_batch("COMMIT").map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn rollback_transaction(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute_batch("ROLLBACK").map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self, scope: Option<&Scope>) -> crate::error::Result<CatalogStats> {
        let conn = self.lock();
        let mut stats =
            collect_stats(&conn, scope.map(Scope::as_str)).map_err(StoreError::Sqlite)?;
        stats.db_size_bytes = self.db_size_bytes();
        Ok(stats)
    }
}

/// Aggregate counts for one scope (or all when `scope` is `None`).
///
/// Shared by the writer and the read-only query service; `db_size_bytes` is
/// left for the caller to fill.
pub(crate) fn collect_stats(conn: &Connection, scope: Option<&str>) -> rusqlite::Result<CatalogStats> {
    let filter = "(?1 IS NULL OR scope = ?1)";
    let count = |sql: String| -> rusqlite::Result<u64> {
        conn.query_row(&sql, params![scope], |row| row.get(0))
    };

    let total_files = count(format!("SELECT COUNT(*) FROM file_index WHERE {filter}"))?;
    let documents = count(format!("SELECT COUNT(*) FROM documents WHERE {filter}"))?;
    let document_errors = count(format!(
        "SELECT COUNT(*) FROM documents WHERE {filter} AND error IS NOT NULL"
    ))?;
    let sample_refs = count(format!("SELECT COUNT(*) FROM doc_sample_refs WHERE {filter}"))?;
    let device_hints = count(format!("SELECT COUNT(*) FROM doc_device_hints WHERE {filter}"))?;
    let refs_total = count(format!("SELECT COUNT(*) FROM refs_graph WHERE {filter}"))?;
    let refs_missing = count(format!(
        "SELECT COUNT(*) FROM refs_graph WHERE {filter} AND exists_flag = 0"
    ))?;
    let scan_state_entries = count(format!("SELECT COUNT(*) FROM scan_state WHERE {filter}"))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT kind, COUNT(*) FROM file_index WHERE {filter} GROUP BY kind"
    ))?;
    let files_by_kind: BTreeMap<String, u64> = stmt
        .query_map(params![scope], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

    let schema_version = conn
        .query_row(
            "SELECT value FROM catalog_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(CatalogStats {
        total_files,
        files_by_kind,
        documents,
        document_errors,
        sample_refs,
        device_hints,
        refs_total,
        refs_missing,
        scan_state_entries,
        db_size_bytes: 0,
        schema_version,
    })
}

/// Size of a database file plus its write-ahead log.
pub(crate) fn db_file_size(path: &Path) -> u64 {
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    [path.to_path_buf(), PathBuf::from(wal)]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

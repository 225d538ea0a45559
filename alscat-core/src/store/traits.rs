use std::collections::HashSet;

use crate::scan::ScanState;
use crate::types::{
    CatalogStats, DocumentMetrics, DocumentRecord, FileEntry, FileKind, FileRecord, Materialized,
    RefEdge, Scope,
};

/// Position reached in one snapshot source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestCursor {
    /// Bytes already consumed.
    pub offset: u64,
    /// Digest of the source's first line when the offset was recorded.
    pub head_digest: Option<String>,
}

/// The catalog store abstraction. Ingestion, analytics and maintenance all
/// write through this trait; read-only consumers use the query service.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    // ── Ingest writes ──────────────────────────────────────────────

    /// Upsert file rows by (scope, path). A repeated key replaces the row
    /// wholesale; the same path under another scope is a separate row.
    async fn upsert_files(&self, files: &[FileRecord]) -> crate::error::Result<u64>;

    /// Upsert documents, replacing their sample, hint and sequence children.
    async fn upsert_documents(&self, docs: &[DocumentRecord]) -> crate::error::Result<u64>;

    /// Upsert reference edges keyed by (scope, src, kind, target).
    async fn upsert_references(&self, edges: &[RefEdge]) -> crate::error::Result<u64>;

    /// Delete reference edges scanned before their document's latest scan.
    async fn prune_stale_references(&self, scope: &Scope) -> crate::error::Result<u64>;

    /// Replace the stored scan state for a scope.
    async fn replace_scan_state(&self, scope: &Scope, state: &ScanState)
    -> crate::error::Result<u64>;

    /// Rebuild the denormalised `catalog_docs` rows for a scope.
    async fn refresh_catalog_docs(&self, scope: &Scope) -> crate::error::Result<u64>;

    /// Position reached in a snapshot source (offset 0 when never ingested).
    async fn ingest_cursor(&self, scope: &Scope, source: &str)
    -> crate::error::Result<IngestCursor>;

    /// Record the position reached in a snapshot source.
    async fn set_ingest_cursor(
        &self,
        scope: &Scope,
        source: &str,
        cursor: &IngestCursor,
    ) -> crate::error::Result<()>;

    // ── Analytics reads ────────────────────────────────────────────

    /// Per-document device sequences in stored position order.
    async fn device_sequences(&self, scope: &Scope)
    -> crate::error::Result<Vec<(String, Vec<String>)>>;

    /// Per-document deduplicated device hints.
    async fn device_hints(&self, scope: &Scope) -> crate::error::Result<Vec<(String, Vec<String>)>>;

    /// Joined per-document metrics (size, counts, missing references).
    async fn document_metrics(&self, scope: &Scope) -> crate::error::Result<Vec<DocumentMetrics>>;

    /// Targets of reference edges whose existence flag is false.
    async fn missing_references(&self, scope: &Scope) -> crate::error::Result<Vec<String>>;

    /// File rows of a scope, optionally restricted to one kind.
    async fn files(
        &self,
        scope: &Scope,
        kind: Option<FileKind>,
    ) -> crate::error::Result<Vec<FileEntry>>;

    /// Every sample path referenced by any document in any scope.
    async fn referenced_samples(&self) -> crate::error::Result<HashSet<String>>;

    // ── Analytics writes ───────────────────────────────────────────

    /// Replace one analytics table's rows for a scope.
    async fn replace_materialized(
        &self,
        scope: &Scope,
        table: &Materialized,
        computed_at: i64,
    ) -> crate::error::Result<()>;

    // ── Maintenance ────────────────────────────────────────────────

    /// Paths of all file rows, optionally for one scope.
    async fn file_paths(&self, scope: Option<&Scope>) -> crate::error::Result<Vec<String>>;

    /// Delete file rows and everything derived from them, in one scope or in
    /// all of them. Returns file rows removed.
    async fn remove_paths(&self, scope: Option<&Scope>, paths: &[String])
    -> crate::error::Result<u64>;

    /// Drop every table and recreate the empty schema. Inside an open
    /// transaction the reset commits or rolls back with it.
    async fn reset(&self) -> crate::error::Result<()>;

    /// Refresh planner statistics.
    async fn optimize(&self) -> crate::error::Result<()>;

    /// Rewrite the database file to reclaim free pages.
    async fn compact(&self) -> crate::error::Result<()>;

    // ── Metadata ───────────────────────────────────────────────────

    /// Read a `catalog_meta` value.
    async fn meta(&self, key: &str) -> crate::error::Result<Option<String>>;

    /// Set a `catalog_meta` value.
    async fn set_meta(&self, key: &str, value: &str) -> crate::error::Result<()>;

    // ── Transactions ──────────────────────────────────────────────

    /// Begin an explicit transaction. Operations between begin and commit
    /// are executed atomically. Default: no-op (each operation auto-commits).
    async fn begin_transaction(&self) -> crate::error::Result<()> {
        Ok(())
    }

    /// Commit the current transaction started by `begin_transaction`.
    async fn commit_transaction(&self) -> crate::error::Result<()> {
        Ok(())
    }

    /// Roll back the current transaction started by `begin_transaction`.
    async fn rollback_transaction(&self) -> crate::error::Result<()> {
        Ok(())
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Summary counts, for one scope or the whole catalog.
    async fn stats(&self, scope: Option<&Scope>) -> crate::error::Result<CatalogStats>;
}

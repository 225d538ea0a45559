// Read-only query service over a built catalog.
//
// Used by the CLI `query` and `report` commands. Every method is
// parameterised and returns typed rows; a missing catalog or table is an
// error, never an empty result.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::store::sqlite::{collect_stats, db_file_size};
use crate::types::{
    ActivityWindow, AudioFootprint, CatalogDoc, CatalogStats, ChainStat, DevicePair, DeviceUsage,
    FileEntry, FileKind, IssueKind, MissingHotspot, QualityIssue, RecentDeviceUsage, Scope,
    ScopeSelector, SetHealth, SetSize, StorageSummary, UnreferencedDir,
};

/// Result cap applied when a caller gives none.
pub const DEFAULT_LIMIT: usize = 500;

/// SQL predicate that is true when `column` names a backup path.
///
/// Mirrors [`crate::types::is_backup_path`]: `backup` directory segments in
/// either separator style, or a bracketed token starting with a digit.
pub fn backup_predicate(column: &str) -> String {
    format!(
        "(lower({column}) LIKE '%/backup/%' OR lower({column}) LIKE '%\\backup\\%' \
         OR lower({column}) LIKE 'backup/%' OR lower({column}) LIKE 'backup\\%' \
         OR {column} GLOB '*[[][0-9]*]*')"
    )
}

/// `LIKE` pattern matching `term` as a literal substring under `ESCAPE '\'`.
fn like_contains(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// A row tagged with the scope it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoped<T> {
    pub scope: Scope,
    #[serde(flatten)]
    pub row: T,
}

/// Filters for [`CatalogQuery::documents`].
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Substring matched against path and name.
    pub term: Option<String>,
    pub scope: ScopeSelector,
    /// Only documents with at least one missing reference.
    pub missing_only: bool,
    pub min_devices: Option<u32>,
    pub min_samples: Option<u32>,
    pub include_backups: bool,
    pub limit: Option<usize>,
}

/// Filters for [`CatalogQuery::files`].
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub term: Option<String>,
    pub kind: Option<FileKind>,
    pub scope: ScopeSelector,
    pub include_backups: bool,
    pub limit: Option<usize>,
}

/// Read-only handle on a catalog database.
#[derive(Debug)]
pub struct CatalogQuery {
    conn: Connection,
    path: PathBuf,
    default_limit: usize,
}

type Params = Vec<Box<dyn ToSql>>;

impl CatalogQuery {
    /// Open `path` read-only. A missing file is [`QueryError::Unavailable`].
    pub fn open(path: &Path) -> Result<Self, QueryError> {
        if !path.is_file() {
            return Err(QueryError::Unavailable {
                path: path.to_path_buf(),
                message: "catalog file does not exist".into(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| QueryError::Unavailable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        conn.pragma_update(None, "query_only", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            default_limit: DEFAULT_LIMIT,
        })
    }

    /// Override the cap used when a query gives no limit.
    pub fn with_default_limit(mut self, limit: usize) -> Result<Self, QueryError> {
        self.default_limit = check_limit(limit)?;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn limit(&self, requested: Option<usize>) -> Result<usize, QueryError> {
        check_limit(requested.unwrap_or(self.default_limit))
    }

    /// Run `sql` and map rows, turning a missing table into `Unavailable`.
    fn rows<T>(
        &self,
        sql: &str,
        params: &Params,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, QueryError> {
        let params_ref: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let run = || -> rusqlite::Result<Vec<T>> {
            let mut stmt = self.conn.prepare(sql)?;
            stmt.query_map(params_ref.as_slice(), map)?
                .collect::<rusqlite::Result<Vec<_>>>()
        };
        run().map_err(|e| self.classify(e))
    }

    fn classify(&self, e: rusqlite::Error) -> QueryError {
        let message = e.to_string();
        if message.contains("no such table") || message.contains("no such column") {
            QueryError::Unavailable {
                path: self.path.clone(),
                message,
            }
        } else {
            QueryError::Sqlite(e)
        }
    }

    // ── Entity queries ─────────────────────────────────────────────

    /// Documents matching `filter`, most recently scanned first.
    pub fn documents(&self, filter: &DocumentFilter) -> Result<Vec<CatalogDoc>, QueryError> {
        let limit = self.limit(filter.limit)?;
        let mut sql = String::from(
            "SELECT path, scope, name, size, mtime, tempo, tracks_total, clips_total,
                    devices_count, samples_count, missing_refs, error, scanned_at
             FROM catalog_docs WHERE 1=1",
        );
        let mut params: Params = Vec::new();

        if let Some(scope) = filter.scope.scope() {
            params.push(Box::new(scope.as_str().to_string()));
            let _ = write!(sql, " AND scope = ?{}", params.len());
        }
        if let Some(term) = &filter.term {
            params.push(Box::new(like_contains(term)));
            let n = params.len();
            let _ = write!(
                sql,
                " AND (path LIKE ?{n} ESCAPE '\\' OR name LIKE ?{n} ESCAPE '\\')"
            );
        }
        if filter.missing_only {
            sql.push_str(" AND missing_refs > 0");
        }
        if let Some(min) = filter.min_devices {
            params.push(Box::new(min));
            let _ = write!(sql, " AND devices_count >= ?{}", params.len());
        }
        if let Some(min) = filter.min_samples {
            params.push(Box::new(min));
            let _ = write!(sql, " AND samples_count >= ?{}", params.len());
        }
        if !filter.include_backups {
            let _ = write!(sql, " AND NOT {}", backup_predicate("path"));
        }
        let _ = write!(sql, " ORDER BY scanned_at DESC, path LIMIT {limit}");

        self.rows(&sql, &params, |row| {
            Ok(CatalogDoc {
                path: row.get(0)?,
                scope: scope_at(row, 1)?,
                name: row.get(2)?,
                size: row.get(3)?,
                mtime: row.get(4)?,
                tempo: row.get(5)?,
                tracks_total: row.get(6)?,
                clips_total: row.get(7)?,
                devices_count: row.get(8)?,
                samples_count: row.get(9)?,
                missing_refs: row.get(10)?,
                error: row.get(11)?,
                scanned_at: row.get(12)?,
            })
        })
    }

    /// Indexed files matching `filter`, ordered by path.
    pub fn files(&self, filter: &FileFilter) -> Result<Vec<FileEntry>, QueryError> {
        let limit = self.limit(filter.limit)?;
        let mut sql = String::from(
            "SELECT path, scope, ext, kind, size, mtime, scanned_at, content_hash
             FROM file_index WHERE 1=1",
        );
        let mut params: Params = Vec::new();

        if let Some(scope) = filter.scope.scope() {
            params.push(Box::new(scope.as_str().to_string()));
            let _ = write!(sql, " AND scope = ?{}", params.len());
        }
        if let Some(kind) = filter.kind {
            params.push(Box::new(kind.as_str()));
            let _ = write!(sql, " AND kind = ?{}", params.len());
        }
        if let Some(term) = &filter.term {
            params.push(Box::new(like_contains(term)));
            let _ = write!(sql, " AND path LIKE ?{} ESCAPE '\\'", params.len());
        }
        if !filter.include_backups {
            let _ = write!(sql, " AND NOT {}", backup_predicate("path"));
        }
        let _ = write!(sql, " ORDER BY path LIMIT {limit}");

        self.rows(&sql, &params, |row| {
            let kind: String = row.get(3)?;
            Ok(FileEntry {
                path: row.get(0)?,
                scope: scope_at(row, 1)?,
                ext: row.get(2)?,
                kind: FileKind::parse(&kind).unwrap_or(FileKind::Other),
                size: row.get(4)?,
                mtime: row.get(5)?,
                scanned_at: row.get(6)?,
                content_hash: row.get(7)?,
            })
        })
    }

    // ── Device analytics ───────────────────────────────────────────

    pub fn top_devices(
        &self,
        scope: &ScopeSelector,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<DeviceUsage>>, QueryError> {
        self.scoped(
            "SELECT scope, device, usage_count, doc_count FROM device_usage",
            scope,
            &[],
            "usage_count DESC, device",
            limit,
            |row| {
                Ok(DeviceUsage {
                    device: row.get(1)?,
                    usage_count: row.get(2)?,
                    doc_count: row.get(3)?,
                })
            },
        )
    }

    /// Most common chains, optionally restricted to one chain length.
    pub fn top_chains(
        &self,
        scope: &ScopeSelector,
        chain_len: Option<u32>,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<ChainStat>>, QueryError> {
        let extra: Vec<(&str, Box<dyn ToSql>)> = chain_len
            .map(|len| ("chain_len", Box::new(len) as Box<dyn ToSql>))
            .into_iter()
            .collect();
        self.scoped(
            "SELECT scope, chain, chain_len, usage_count FROM device_chain_stats",
            scope,
            &extra,
            "usage_count DESC, chain",
            limit,
            |row| {
                Ok(ChainStat {
                    chain: row.get(1)?,
                    chain_len: row.get(2)?,
                    usage_count: row.get(3)?,
                })
            },
        )
    }

    pub fn device_pairs(
        &self,
        scope: &ScopeSelector,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<DevicePair>>, QueryError> {
        self.scoped(
            "SELECT scope, device_a, device_b, count FROM device_cooccurrence",
            scope,
            &[],
            "count DESC, device_a, device_b",
            limit,
            |row| {
                Ok(DevicePair {
                    device_a: row.get(1)?,
                    device_b: row.get(2)?,
                    count: row.get(3)?,
                })
            },
        )
    }

    pub fn recent_devices(
        &self,
        scope: &ScopeSelector,
        window_days: Option<u32>,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<RecentDeviceUsage>>, QueryError> {
        let extra: Vec<(&str, Box<dyn ToSql>)> = window_days
            .map(|days| ("window_days", Box::new(days) as Box<dyn ToSql>))
            .into_iter()
            .collect();
        self.scoped(
            "SELECT scope, window_days, device, doc_count FROM device_usage_recent",
            scope,
            &extra,
            "window_days, doc_count DESC, device",
            limit,
            |row| {
                Ok(RecentDeviceUsage {
                    window_days: row.get(1)?,
                    device: row.get(2)?,
                    doc_count: row.get(3)?,
                })
            },
        )
    }

    // ── Health ─────────────────────────────────────────────────────

    pub fn missing_hotspots(
        &self,
        scope: &ScopeSelector,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<MissingHotspot>>, QueryError> {
        self.scoped(
            "SELECT scope, directory, missing_count FROM missing_refs_by_path",
            scope,
            &[],
            "missing_count DESC, directory",
            limit,
            |row| {
                Ok(MissingHotspot {
                    directory: row.get(1)?,
                    missing_count: row.get(2)?,
                })
            },
        )
    }

    /// Lowest health scores first.
    pub fn worst_health(
        &self,
        scope: &ScopeSelector,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<SetHealth>>, QueryError> {
        self.scoped(
            "SELECT scope, path, score, missing_refs, devices_count, samples_count FROM set_health",
            scope,
            &[],
            "score ASC, path",
            limit,
            |row| {
                Ok(SetHealth {
                    path: row.get(1)?,
                    score: row.get(2)?,
                    missing_refs: row.get(3)?,
                    devices_count: row.get(4)?,
                    samples_count: row.get(5)?,
                })
            },
        )
    }

    pub fn quality_issues(
        &self,
        scope: &ScopeSelector,
        issue: Option<IssueKind>,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<QualityIssue>>, QueryError> {
        let extra: Vec<(&str, Box<dyn ToSql>)> = issue
            .map(|kind| ("issue", Box::new(kind.as_str()) as Box<dyn ToSql>))
            .into_iter()
            .collect();
        self.scoped(
            "SELECT scope, path, issue, issue_value, severity FROM quality_issues",
            scope,
            &extra,
            "severity DESC, issue_value DESC, path",
            limit,
            |row| {
                let raw: String = row.get(2)?;
                let issue = IssueKind::parse(&raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        Type::Text,
                        format!("unknown issue kind: {raw}").into(),
                    )
                })?;
                Ok(QualityIssue {
                    path: row.get(1)?,
                    issue,
                    issue_value: row.get(3)?,
                    severity: row.get(4)?,
                })
            },
        )
    }

    // ── Storage ────────────────────────────────────────────────────

    pub fn storage_summary(
        &self,
        scope: &ScopeSelector,
    ) -> Result<Vec<Scoped<StorageSummary>>, QueryError> {
        self.scoped(
            "SELECT scope, total_bytes, total_count, non_backup_bytes, non_backup_count
             FROM set_storage_summary",
            scope,
            &[],
            "scope",
            None,
            |row| {
                Ok(StorageSummary {
                    total_bytes: row.get(1)?,
                    total_count: row.get(2)?,
                    non_backup_bytes: row.get(3)?,
                    non_backup_count: row.get(4)?,
                })
            },
        )
    }

    pub fn activity(
        &self,
        scope: &ScopeSelector,
    ) -> Result<Vec<Scoped<ActivityWindow>>, QueryError> {
        self.scoped(
            "SELECT scope, window_days, doc_count, bytes FROM set_activity_stats",
            scope,
            &[],
            "scope, window_days",
            None,
            |row| {
                Ok(ActivityWindow {
                    window_days: row.get(1)?,
                    doc_count: row.get(2)?,
                    bytes: row.get(3)?,
                })
            },
        )
    }

    pub fn largest_sets(
        &self,
        scope: &ScopeSelector,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<SetSize>>, QueryError> {
        self.scoped(
            "SELECT scope, path, size, mtime FROM set_size_top",
            scope,
            &[],
            "size DESC, path",
            limit,
            |row| {
                Ok(SetSize {
                    path: row.get(1)?,
                    size: row.get(2)?,
                    mtime: row.get(3)?,
                })
            },
        )
    }

    pub fn audio_footprint(
        &self,
        scope: &ScopeSelector,
    ) -> Result<Vec<Scoped<AudioFootprint>>, QueryError> {
        self.scoped(
            "SELECT scope, total_bytes, total_count, referenced_bytes, referenced_count,
                    unreferenced_bytes, unreferenced_count
             FROM audio_footprint",
            scope,
            &[],
            "scope",
            None,
            |row| {
                Ok(AudioFootprint {
                    total_bytes: row.get(1)?,
                    total_count: row.get(2)?,
                    referenced_bytes: row.get(3)?,
                    referenced_count: row.get(4)?,
                    unreferenced_bytes: row.get(5)?,
                    unreferenced_count: row.get(6)?,
                })
            },
        )
    }

    pub fn unreferenced_audio(
        &self,
        scope: &ScopeSelector,
        limit: Option<usize>,
    ) -> Result<Vec<Scoped<UnreferencedDir>>, QueryError> {
        self.scoped(
            "SELECT scope, directory, file_count, bytes FROM unreferenced_audio_by_path",
            scope,
            &[],
            "bytes DESC, directory",
            limit,
            |row| {
                Ok(UnreferencedDir {
                    directory: row.get(1)?,
                    file_count: row.get(2)?,
                    bytes: row.get(3)?,
                })
            },
        )
    }

    // ── Metrics ────────────────────────────────────────────────────

    pub fn stats(&self, scope: &ScopeSelector) -> Result<CatalogStats, QueryError> {
        let mut stats = collect_stats(&self.conn, scope.scope().map(Scope::as_str))
            .map_err(|e| self.classify(e))?;
        stats.db_size_bytes = db_file_size(&self.path);
        Ok(stats)
    }

    /// A `catalog_meta` value, such as the last ingest time.
    pub fn meta(&self, key: &str) -> Result<Option<String>, QueryError> {
        let rows = self.rows(
            "SELECT value FROM catalog_meta WHERE key = ?1",
            &vec![Box::new(key.to_string()) as Box<dyn ToSql>],
            |row| row.get(0),
        )?;
        Ok(rows.into_iter().next())
    }

    /// Shared shape for analytics tables: `select` must start with the
    /// `scope` column; `extra` adds equality filters.
    fn scoped<T>(
        &self,
        select: &str,
        scope: &ScopeSelector,
        extra: &[(&str, Box<dyn ToSql>)],
        order: &str,
        limit: Option<usize>,
        mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<Scoped<T>>, QueryError> {
        let limit = self.limit(limit)?;
        let mut sql = format!("{select} WHERE 1=1");
        let mut refs: Vec<&dyn ToSql> = Vec::new();
        let scope_name = scope.scope().map(|s| s.as_str().to_string());
        if let Some(name) = &scope_name {
            refs.push(name);
            let _ = write!(sql, " AND scope = ?{}", refs.len());
        }
        for (column, value) in extra {
            refs.push(value.as_ref());
            let _ = write!(sql, " AND {column} = ?{}", refs.len());
        }
        let _ = write!(sql, " ORDER BY {order} LIMIT {limit}");

        let mut run = || -> rusqlite::Result<Vec<Scoped<T>>> {
            let mut stmt = self.conn.prepare(&sql)?;
            stmt.query_map(refs.as_slice(), |row| {
                Ok(Scoped {
                    scope: scope_at(row, 0)?,
                    row: map(row)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
        };
        run().map_err(|e| self.classify(e))
    }
}

fn check_limit(limit: usize) -> Result<usize, QueryError> {
    if limit == 0 {
        Err(QueryError::InvalidLimit(limit))
    } else {
        Ok(limit)
    }
}

fn scope_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Scope> {
    let raw: String = row.get(idx)?;
    Scope::new(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

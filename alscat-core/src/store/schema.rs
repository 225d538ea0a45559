/// Current schema version.
pub const SCHEMA_VERSION: &str = "2";

/// Table definitions. Every table carries a `scope` column; indexes are
/// created separately in [`INDEXES_SQL`] after column migration.
pub const SCHEMA_SQL: &str = r"
-- Schema version and catalog-level settings
CREATE TABLE IF NOT EXISTS catalog_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Byte offsets already consumed from each snapshot source, with a digest
-- of the source's first line so a replaced file is read from the start
CREATE TABLE IF NOT EXISTS ingest_state (
    scope TEXT NOT NULL,
    source TEXT NOT NULL,
    byte_offset INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (scope, source)
);

-- Every indexed filesystem entry
CREATE TABLE IF NOT EXISTS file_index (
    path TEXT NOT NULL,
    scope TEXT NOT NULL,
    ext TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    kind TEXT NOT NULL,
    scanned_at INTEGER NOT NULL,
    PRIMARY KEY (scope, path)
);

-- Parsed project documents (one per document file)
CREATE TABLE IF NOT EXISTS documents (
    path TEXT NOT NULL,
    scope TEXT NOT NULL,
    ext TEXT NOT NULL,
    scanned_at INTEGER NOT NULL,
    PRIMARY KEY (scope, path)
);

CREATE TABLE IF NOT EXISTS doc_sample_refs (
    doc_path TEXT NOT NULL,
    sample_path TEXT NOT NULL,
    scope TEXT NOT NULL,
    PRIMARY KEY (scope, doc_path, sample_path)
);

CREATE TABLE IF NOT EXISTS doc_device_hints (
    doc_path TEXT NOT NULL,
    device TEXT NOT NULL,
    scope TEXT NOT NULL,
    PRIMARY KEY (scope, doc_path, device)
);

-- Device names in document order, used for chain analytics
CREATE TABLE IF NOT EXISTS doc_device_sequence (
    doc_path TEXT NOT NULL,
    position INTEGER NOT NULL,
    device TEXT NOT NULL,
    scope TEXT NOT NULL,
    PRIMARY KEY (scope, doc_path, position)
);

-- Generalised reference edges with point-in-time existence
CREATE TABLE IF NOT EXISTS refs_graph (
    src TEXT NOT NULL,
    ref_kind TEXT NOT NULL,
    ref_path TEXT NOT NULL,
    scope TEXT NOT NULL,
    exists_flag INTEGER NOT NULL,
    scanned_at INTEGER NOT NULL,
    PRIMARY KEY (scope, src, ref_kind, ref_path)
);

CREATE TABLE IF NOT EXISTS scan_state (
    path TEXT NOT NULL,
    scope TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    content_hash TEXT,
    PRIMARY KEY (scope, path)
);

-- Denormalised per-document row for listing and search
CREATE TABLE IF NOT EXISTS catalog_docs (
    path TEXT NOT NULL,
    scope TEXT NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    mtime INTEGER NOT NULL DEFAULT 0,
    tempo REAL,
    tracks_total INTEGER NOT NULL DEFAULT 0,
    clips_total INTEGER NOT NULL DEFAULT 0,
    devices_count INTEGER NOT NULL DEFAULT 0,
    samples_count INTEGER NOT NULL DEFAULT 0,
    missing_refs INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    scanned_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (scope, path)
);

-- ── Analytics (replaced wholesale per scope) ──────────────────────

CREATE TABLE IF NOT EXISTS device_usage (
    scope TEXT NOT NULL,
    device TEXT NOT NULL,
    usage_count INTEGER NOT NULL,
    doc_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, device)
);

CREATE TABLE IF NOT EXISTS device_chain_stats (
    scope TEXT NOT NULL,
    chain TEXT NOT NULL,
    chain_len INTEGER NOT NULL,
    usage_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, chain)
);

CREATE TABLE IF NOT EXISTS device_cooccurrence (
    scope TEXT NOT NULL,
    device_a TEXT NOT NULL,
    device_b TEXT NOT NULL,
    count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, device_a, device_b)
);

CREATE TABLE IF NOT EXISTS device_usage_recent (
    scope TEXT NOT NULL,
    window_days INTEGER NOT NULL,
    device TEXT NOT NULL,
    doc_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, window_days, device)
);

CREATE TABLE IF NOT EXISTS doc_complexity (
    scope TEXT NOT NULL,
    path TEXT NOT NULL,
    tracks_total INTEGER NOT NULL,
    clips_total INTEGER NOT NULL,
    devices_count INTEGER NOT NULL,
    samples_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, path)
);

CREATE TABLE IF NOT EXISTS set_health (
    scope TEXT NOT NULL,
    path TEXT NOT NULL,
    score REAL NOT NULL,
    missing_refs INTEGER NOT NULL,
    devices_count INTEGER NOT NULL,
    samples_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, path)
);

CREATE TABLE IF NOT EXISTS quality_issues (
    scope TEXT NOT NULL,
    path TEXT NOT NULL,
    issue TEXT NOT NULL,
    issue_value INTEGER NOT NULL,
    severity INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, path, issue)
);

CREATE TABLE IF NOT EXISTS missing_refs_by_path (
    scope TEXT NOT NULL,
    directory TEXT NOT NULL,
    missing_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, directory)
);

CREATE TABLE IF NOT EXISTS set_storage_summary (
    scope TEXT PRIMARY KEY,
    total_bytes INTEGER NOT NULL,
    total_count INTEGER NOT NULL,
    non_backup_bytes INTEGER NOT NULL,
    non_backup_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS set_activity_stats (
    scope TEXT NOT NULL,
    window_days INTEGER NOT NULL,
    doc_count INTEGER NOT NULL,
    bytes INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, window_days)
);

CREATE TABLE IF NOT EXISTS set_size_top (
    scope TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, path)
);

CREATE TABLE IF NOT EXISTS audio_footprint (
    scope TEXT PRIMARY KEY,
    total_bytes INTEGER NOT NULL,
    total_count INTEGER NOT NULL,
    referenced_bytes INTEGER NOT NULL,
    referenced_count INTEGER NOT NULL,
    unreferenced_bytes INTEGER NOT NULL,
    unreferenced_count INTEGER NOT NULL,
    computed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS unreferenced_audio_by_path (
    scope TEXT NOT NULL,
    directory TEXT NOT NULL,
    file_count INTEGER NOT NULL,
    bytes INTEGER NOT NULL,
    computed_at INTEGER NOT NULL,
    PRIMARY KEY (scope, directory)
);
";

/// Secondary indexes, created after column migration so that indexes on
/// added columns never fail against older catalogs.
pub const INDEXES_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_file_index_scope_kind ON file_index(scope, kind);
CREATE INDEX IF NOT EXISTS idx_file_index_ext ON file_index(ext);
CREATE INDEX IF NOT EXISTS idx_file_index_hash ON file_index(content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents(scope);
CREATE INDEX IF NOT EXISTS idx_sample_refs_target ON doc_sample_refs(sample_path);
CREATE INDEX IF NOT EXISTS idx_device_hints_device ON doc_device_hints(device);
CREATE INDEX IF NOT EXISTS idx_device_sequence_scope ON doc_device_sequence(scope);
CREATE INDEX IF NOT EXISTS idx_refs_graph_target ON refs_graph(ref_path);
CREATE INDEX IF NOT EXISTS idx_refs_graph_scope_exists ON refs_graph(scope, exists_flag);
CREATE INDEX IF NOT EXISTS idx_scan_state_scope ON scan_state(scope);
CREATE INDEX IF NOT EXISTS idx_catalog_docs_scope ON catalog_docs(scope, scanned_at);
";

/// Columns added to entity tables after their first release. Missing ones
/// are appended with `ALTER TABLE ... ADD COLUMN` when a catalog is opened.
pub const ADDITIVE_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "file_index",
        &[
            ("path_hash", "TEXT"),
            ("ctime", "INTEGER"),
            ("name", "TEXT"),
            ("parent", "TEXT"),
            ("mime", "TEXT"),
            ("content_hash", "TEXT"),
            ("hash_error", "TEXT"),
            ("audio_codec", "TEXT"),
            ("duration_secs", "REAL"),
            ("sample_rate", "INTEGER"),
            ("channels", "INTEGER"),
            ("bit_depth", "INTEGER"),
        ],
    ),
    (
        "documents",
        &[
            ("tempo", "REAL"),
            ("tracks_audio", "INTEGER NOT NULL DEFAULT 0"),
            ("tracks_midi", "INTEGER NOT NULL DEFAULT 0"),
            ("tracks_return", "INTEGER NOT NULL DEFAULT 0"),
            ("tracks_master", "INTEGER NOT NULL DEFAULT 0"),
            ("tracks_total", "INTEGER NOT NULL DEFAULT 0"),
            ("clips_audio", "INTEGER NOT NULL DEFAULT 0"),
            ("clips_midi", "INTEGER NOT NULL DEFAULT 0"),
            ("clips_total", "INTEGER NOT NULL DEFAULT 0"),
            ("error", "TEXT"),
        ],
    ),
    ("refs_graph", &[("src_kind", "TEXT")]),
    ("ingest_state", &[("head_digest", "TEXT")]),
];

/// Entity tables whose primary key leads with `scope`. Catalogs written
/// before version 2 keyed these on the path alone and are re-keyed on open.
pub const SCOPE_KEYED_TABLES: &[&str] = &[
    "file_index",
    "documents",
    "doc_sample_refs",
    "doc_device_hints",
    "doc_device_sequence",
    "refs_graph",
    "scan_state",
    "catalog_docs",
];

/// Every table owned by the catalog, in drop order.
pub const ALL_TABLES: &[&str] = &[
    "unreferenced_audio_by_path",
    "audio_footprint",
    "set_size_top",
    "set_activity_stats",
    "set_storage_summary",
    "missing_refs_by_path",
    "quality_issues",
    "set_health",
    "doc_complexity",
    "device_usage_recent",
    "device_cooccurrence",
    "device_chain_stats",
    "device_usage",
    "catalog_docs",
    "scan_state",
    "refs_graph",
    "doc_device_sequence",
    "doc_device_hints",
    "doc_sample_refs",
    "documents",
    "file_index",
    "ingest_state",
    "catalog_meta",
];

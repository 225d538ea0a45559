use std::path::PathBuf;

/// Top-level catalog error type.
///
/// All fallible operations in `alscat-core` return [`Result<T, CatalogError>`](Result).
/// Each variant wraps a stage-specific error enum so callers can match on the
/// failing stage without losing detail.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    /// Error from the relational store (`SQLite` operations, migrations).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Run-level scanner failure (invalid root, snapshot I/O, cancellation).
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Snapshot ingestion failure. The ingest transaction was rolled back.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Error while recomputing analytics tables.
    #[error("Analysis error: {0}")]
    Analyze(#[from] AnalyzeError),

    /// Read-path failure from the query service.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error from the document codec or patcher.
    #[error("Document error: {0}")]
    Document(#[from] alscat_doc::DocError),
}

/// Errors from the SQLite-backed catalog store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed (version mismatch or DDL error).
    #[error("Migration failed: {0}")]
    Migration(String),

    /// JSON encoding of a stored value failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catalog database file is missing.
    #[error("Catalog database not found: {0}")]
    NotFound(PathBuf),
}

/// Run-level scanner errors. Per-file problems never surface here.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The scan root is missing or not a directory.
    #[error("Invalid scan root: {0}")]
    InvalidRoot(PathBuf),

    /// Filesystem I/O error writing snapshots or scan state.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot record could not be encoded or decoded.
    #[error("Snapshot error in {path}: {message}")]
    Snapshot {
        /// Snapshot file involved.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The stop flag was raised; state for completed files was saved.
    #[error("Scan cancelled after {indexed} indexed files")]
    Cancelled {
        /// Files indexed before the stop flag was observed.
        indexed: u64,
    },

    /// The worker pool could not be created.
    #[error("Worker pool error: {0}")]
    Pool(String),
}

/// Errors while loading snapshots into the catalog.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// The snapshot directory or a required scope directory is missing.
    #[error("Snapshot directory not found: {0}")]
    MissingSnapshot(PathBuf),

    /// A snapshot line could not be decoded.
    #[error("Malformed record in {path} line {line}: {message}")]
    Malformed {
        path: PathBuf,
        line: u64,
        message: String,
    },

    /// A fresh build was requested over an existing catalog.
    #[error("Catalog already exists at {0}; use overwrite or append")]
    CatalogExists(PathBuf),

    /// Mutually exclusive ingest options were combined.
    #[error("Conflicting ingest modes: {0}")]
    ModeConflict(String),

    /// Filesystem I/O error reading snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors during analytics recomputation.
#[derive(thiserror::Error, Debug)]
pub enum AnalyzeError {
    /// Chain length must be at least one device.
    #[error("Invalid chain length: {0}")]
    InvalidChainLength(usize),

    /// Algorithmic or numerical error during computation.
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Errors from the read-only query service.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The catalog could not be opened for reading.
    #[error("Catalog unavailable at {path}: {message}")]
    Unavailable { path: PathBuf, message: String },

    /// A read query failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A result cap of zero was requested.
    #[error("Invalid limit: {0}")]
    InvalidLimit(usize),
}

/// Errors in catalog configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, CatalogError>`.
pub type Result<T> = std::result::Result<T, CatalogError>;

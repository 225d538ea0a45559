use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use alscat_doc::DocumentSummary;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Scopes ─────────────────────────────────────────────────────────

/// Scope used when none is given.
pub const DEFAULT_SCOPE: &str = "live_recordings";

/// Scopes known to a default configuration.
pub const DEFAULT_SCOPES: &[&str] = &["live_recordings", "user_library", "preferences"];

/// A named partition of the catalog. Queries and analytics never cross
/// scopes unless asked to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(String);

impl Scope {
    /// Validate and wrap a scope name (`[A-Za-z0-9_-]{1,64}`).
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(name))
        } else {
            Err(ConfigError::Invalid(format!("invalid scope name: {name:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self(DEFAULT_SCOPE.to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Scope {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.0
    }
}

impl std::str::FromStr for Scope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Scope selection for read queries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScopeSelector {
    One(Scope),
    #[default]
    All,
}

impl ScopeSelector {
    pub fn scope(&self) -> Option<&Scope> {
        match self {
            Self::One(scope) => Some(scope),
            Self::All => None,
        }
    }
}

impl std::str::FromStr for ScopeSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            Scope::new(s).map(Self::One)
        }
    }
}

// ── File classification ────────────────────────────────────────────

/// Rack, preset, groove and pack extensions.
pub const ARTIFACT_EXTENSIONS: &[&str] = &["adg", "adv", "agr", "alp"];

/// Audio media extensions indexed when media scanning is enabled.
pub const MEDIA_EXTENSIONS: &[&str] = &["wav", "aif", "aiff", "flac", "mp3", "m4a", "ogg"];

/// Coarse classification of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Document,
    Artifact,
    Media,
    Other,
}

impl FileKind {
    /// Classify a lower-cased extension without the leading dot.
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.');
        if alscat_doc::is_document_extension(ext) {
            Self::Document
        } else if ARTIFACT_EXTENSIONS.contains(&ext) {
            Self::Artifact
        } else if MEDIA_EXTENSIONS.contains(&ext) {
            Self::Media
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Artifact => "artifact",
            Self::Media => "media",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "artifact" => Some(Self::Artifact),
            "media" => Some(Self::Media),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static RE_BACKUP_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[[0-9].*\]").expect("backup pattern must compile"));

/// Whether a path belongs to a host-generated backup.
///
/// Matches `backup` directory segments and bracketed timestamp tokens such as
/// `Song [2024-01-02 101500].als`. The store applies the same rule in SQL.
pub fn is_backup_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.contains("/backup/")
        || lower.contains("\\backup\\")
        || lower.starts_with("backup/")
        || lower.starts_with("backup\\")
        || RE_BACKUP_BRACKET.is_match(path)
}

// ── Snapshot records ───────────────────────────────────────────────

/// Audio properties read from media files when audio analysis is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub codec: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
    #[serde(default)]
    pub bit_depth: Option<u16>,
}

/// One indexed filesystem entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub path_hash: String,
    pub ext: String,
    pub size: u64,
    pub mtime: i64,
    #[serde(default)]
    pub ctime: Option<i64>,
    pub name: String,
    pub parent: String,
    #[serde(default)]
    pub mime: Option<String>,
    pub kind: FileKind,
    pub scanned_at: i64,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioInfo>,
}

/// Parse outcome for one project document.
///
/// Exactly one of `summary` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub path: String,
    pub ext: String,
    pub scope: Scope,
    pub scanned_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DocumentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentRecord {
    pub fn parsed(
        path: String,
        ext: String,
        scope: Scope,
        scanned_at: i64,
        summary: DocumentSummary,
    ) -> Self {
        Self {
            path,
            ext,
            scope,
            scanned_at,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn failed(path: String, ext: String, scope: Scope, scanned_at: i64, error: String) -> Self {
        Self {
            path,
            ext,
            scope,
            scanned_at,
            summary: None,
            error: Some(error),
        }
    }
}

/// Kind of external resource a document points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Sample,
}

impl RefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sample => "sample",
        }
    }
}

/// Pointer from a document to an external resource, with a point-in-time
/// existence flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefEdge {
    pub src: String,
    pub src_kind: String,
    pub ref_kind: RefKind,
    pub ref_path: String,
    pub exists: bool,
    pub scanned_at: i64,
    pub scope: Scope,
}

/// Change-detection fingerprint for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    pub fn same_stat(&self, size: u64, mtime: i64) -> bool {
        self.size == size && self.mtime == mtime
    }
}

/// One event emitted by the scanner. A file's `File` event always precedes
/// the `Document` and `Reference` events derived from it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    File(FileRecord),
    Document(DocumentRecord),
    Reference(RefEdge),
}

// ── Store read models ──────────────────────────────────────────────

/// Per-document metrics joined from the catalog, used by analyzers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub tracks_total: u32,
    pub clips_total: u32,
    pub devices_count: u32,
    pub samples_count: u32,
    pub missing_refs: u32,
    pub error: Option<String>,
}

/// A file row as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub scope: Scope,
    pub ext: String,
    pub kind: FileKind,
    pub size: u64,
    pub mtime: i64,
    pub scanned_at: i64,
    pub content_hash: Option<String>,
}

/// A row of the denormalised per-document convenience table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDoc {
    pub path: String,
    pub scope: Scope,
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    pub tempo: Option<f64>,
    pub tracks_total: u32,
    pub clips_total: u32,
    pub devices_count: u32,
    pub samples_count: u32,
    pub missing_refs: u32,
    pub error: Option<String>,
    pub scanned_at: i64,
}

/// Aggregate catalog counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_files: u64,
    pub files_by_kind: BTreeMap<String, u64>,
    pub documents: u64,
    pub document_errors: u64,
    pub sample_refs: u64,
    pub device_hints: u64,
    pub refs_total: u64,
    pub refs_missing: u64,
    pub scan_state_entries: u64,
    pub db_size_bytes: u64,
    pub schema_version: Option<String>,
}

// ── Analytics rows ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub device: String,
    pub usage_count: u64,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStat {
    pub chain: String,
    pub chain_len: u32,
    pub usage_count: u64,
}

/// Unordered device pair; `device_a < device_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePair {
    pub device_a: String,
    pub device_b: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentDeviceUsage {
    pub window_days: u32,
    pub device: String,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocComplexity {
    pub path: String,
    pub tracks_total: u32,
    pub clips_total: u32,
    pub devices_count: u32,
    pub samples_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetHealth {
    pub path: String,
    pub score: f64,
    pub missing_refs: u32,
    pub devices_count: u32,
    pub samples_count: u32,
}

/// Document quality problems, ranked by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ParseError,
    MissingRefs,
    ZeroTracks,
    ZeroClips,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::MissingRefs => "missing_refs",
            Self::ZeroTracks => "zero_tracks",
            Self::ZeroClips => "zero_clips",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parse_error" => Some(Self::ParseError),
            "missing_refs" => Some(Self::MissingRefs),
            "zero_tracks" => Some(Self::ZeroTracks),
            "zero_clips" => Some(Self::ZeroClips),
            _ => None,
        }
    }

    /// Higher is more urgent.
    pub fn severity(self) -> u8 {
        match self {
            Self::ParseError | Self::MissingRefs => 3,
            Self::ZeroTracks => 2,
            Self::ZeroClips => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub path: String,
    pub issue: IssueKind,
    pub issue_value: u64,
    pub severity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingHotspot {
    pub directory: String,
    pub missing_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSummary {
    pub total_bytes: u64,
    pub total_count: u64,
    pub non_backup_bytes: u64,
    pub non_backup_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub window_days: u32,
    pub doc_count: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSize {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFootprint {
    pub total_bytes: u64,
    pub total_count: u64,
    pub referenced_bytes: u64,
    pub referenced_count: u64,
    pub unreferenced_bytes: u64,
    pub unreferenced_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreferencedDir {
    pub directory: String,
    pub file_count: u64,
    pub bytes: u64,
}

/// A fully computed analytics table for one scope, written as a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    DeviceUsage(Vec<DeviceUsage>),
    DeviceChains(Vec<ChainStat>),
    DeviceCooccurrence(Vec<DevicePair>),
    DeviceUsageRecent(Vec<RecentDeviceUsage>),
    DocComplexity(Vec<DocComplexity>),
    SetHealth(Vec<SetHealth>),
    QualityIssues(Vec<QualityIssue>),
    MissingHotspots(Vec<MissingHotspot>),
    StorageSummary(StorageSummary),
    ActivityWindows(Vec<ActivityWindow>),
    SetSizeTop(Vec<SetSize>),
    AudioFootprint(AudioFootprint),
    UnreferencedAudio(Vec<UnreferencedDir>),
}

impl Materialized {
    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::DeviceUsage(_) => "device_usage",
            Self::DeviceChains(_) => "device_chain_stats",
            Self::DeviceCooccurrence(_) => "device_cooccurrence",
            Self::DeviceUsageRecent(_) => "device_usage_recent",
            Self::DocComplexity(_) => "doc_complexity",
            Self::SetHealth(_) => "set_health",
            Self::QualityIssues(_) => "quality_issues",
            Self::MissingHotspots(_) => "missing_refs_by_path",
            Self::StorageSummary(_) => "set_storage_summary",
            Self::ActivityWindows(_) => "set_activity_stats",
            Self::SetSizeTop(_) => "set_size_top",
            Self::AudioFootprint(_) => "audio_footprint",
            Self::UnreferencedAudio(_) => "unreferenced_audio_by_path",
        }
    }

    /// Number of rows this table will hold.
    pub fn row_count(&self) -> usize {
        match self {
            Self::DeviceUsage(rows) => rows.len(),
            Self::DeviceChains(rows) => rows.len(),
            Self::DeviceCooccurrence(rows) => rows.len(),
            Self::DeviceUsageRecent(rows) => rows.len(),
            Self::DocComplexity(rows) => rows.len(),
            Self::SetHealth(rows) => rows.len(),
            Self::QualityIssues(rows) => rows.len(),
            Self::MissingHotspots(rows) => rows.len(),
            Self::ActivityWindows(rows) => rows.len(),
            Self::SetSizeTop(rows) => rows.len(),
            Self::UnreferencedAudio(rows) => rows.len(),
            Self::StorageSummary(_) | Self::AudioFootprint(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scope_validation() {
        assert!(Scope::new("live_recordings").is_ok());
        assert!(Scope::new("user-library2").is_ok());
        assert!(Scope::new("").is_err());
        assert!(Scope::new("bad scope").is_err());
        assert!(Scope::new("x; DROP TABLE").is_err());
        assert_eq!(Scope::default().as_str(), DEFAULT_SCOPE);
    }

    #[test]
    fn scope_selector_parses_all() {
        assert_eq!("all".parse::<ScopeSelector>().unwrap(), ScopeSelector::All);
        assert_eq!(
            "user_library".parse::<ScopeSelector>().unwrap(),
            ScopeSelector::One(Scope::new("user_library").unwrap())
        );
    }

    #[test]
    fn scope_rejects_invalid_names_when_deserialized() {
        let err = serde_json::from_str::<Scope>("\"no spaces\"");
        assert!(err.is_err());
        let ok: Scope = serde_json::from_str("\"preferences\"").unwrap();
        assert_eq!(ok.as_str(), "preferences");
    }

    #[test]
    fn classify_extensions() {
        assert_eq!(FileKind::from_extension("als"), FileKind::Document);
        assert_eq!(FileKind::from_extension(".alc"), FileKind::Document);
        assert_eq!(FileKind::from_extension("adg"), FileKind::Artifact);
        assert_eq!(FileKind::from_extension("wav"), FileKind::Media);
        assert_eq!(FileKind::from_extension("txt"), FileKind::Other);
    }

    #[test]
    fn backup_paths() {
        assert!(is_backup_path("/Music/Project/Backup/Song.als"));
        assert!(is_backup_path("C:\\Music\\Backup\\Song.als"));
        assert!(is_backup_path("backup/Song.als"));
        assert!(is_backup_path("/Music/Song [2024-01-02 101500].als"));
        assert!(!is_backup_path("/Music/Backups/Song.als"));
        assert!(!is_backup_path("/Music/Song [final].als"));
        assert!(!is_backup_path("/Music/Song.als"));
    }

    #[test]
    fn issue_severity_orders_problems() {
        assert!(IssueKind::MissingRefs.severity() > IssueKind::ZeroTracks.severity());
        assert!(IssueKind::ZeroTracks.severity() > IssueKind::ZeroClips.severity());
        for kind in [
            IssueKind::ParseError,
            IssueKind::MissingRefs,
            IssueKind::ZeroTracks,
            IssueKind::ZeroClips,
        ] {
            assert_eq!(IssueKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn file_record_tolerates_additive_fields() {
        let json = r#"{
            "path": "/m/a.wav", "path_hash": "h", "ext": "wav", "size": 10,
            "mtime": 5, "name": "a.wav", "parent": "/m", "kind": "media",
            "scanned_at": 7, "scope": "live_recordings", "future_field": [1, 2]
        }"#;
        let record: FileRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, FileKind::Media);
        assert_eq!(record.ctime, None);
        assert!(record.content_hash.is_none());
    }

    fn arb_kind() -> impl Strategy<Value = FileKind> {
        prop_oneof![
            Just(FileKind::Document),
            Just(FileKind::Artifact),
            Just(FileKind::Media),
            Just(FileKind::Other),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn file_kind_string_roundtrip(kind in arb_kind()) {
            prop_assert_eq!(FileKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            prop_assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}

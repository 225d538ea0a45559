//! Per-path fingerprint cache persisted between scans.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ScanError;
use crate::types::Fingerprint;

/// Fingerprints keyed by absolute path, serialised as one JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanState {
    entries: BTreeMap<String, Fingerprint>,
}

impl ScanState {
    /// Load state from `path`. A missing file yields an empty state; an
    /// unreadable one is logged and treated as empty, which forces a full pass.
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ScanError::Io(e)),
        };
        match serde_json::from_str(&text) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable scan state");
                Ok(Self::default())
            }
        }
    }

    /// Write state with write-temp-then-rename so readers never see a torn file.
    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        let bytes = serde_json::to_vec(self).map_err(|e| ScanError::Snapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: String, fingerprint: Fingerprint) {
        self.entries.insert(path, fingerprint);
    }

    pub fn remove(&mut self, path: &str) -> Option<Fingerprint> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Fingerprint)> {
        self.entries.iter()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// What the incremental scanner does with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Unchanged; emit nothing.
    Skip,
    /// Index without hashing.
    Index,
    /// Index with a hash already computed during the decision.
    IndexHashed(Result<String, String>),
}

/// Decide whether a file must be re-indexed.
///
/// A file is skipped only when its size and mtime match the prior entry and
/// either hashing is off or a prior hash exists. With `rehash_unchanged` the
/// prior hash is verified first and the file is skipped only if it matches.
pub fn decide(
    prev: Option<&Fingerprint>,
    size: u64,
    mtime: i64,
    incremental: bool,
    hash: bool,
    rehash_unchanged: bool,
    compute_hash: impl FnOnce() -> Result<String, String>,
) -> Decision {
    let Some(prev) = prev.filter(|p| incremental && p.same_stat(size, mtime)) else {
        return Decision::Index;
    };
    if !hash {
        return Decision::Skip;
    }
    let Some(prior_hash) = prev.content_hash.as_deref() else {
        return Decision::Index;
    };
    if !rehash_unchanged {
        return Decision::Skip;
    }
    match compute_hash() {
        Ok(current) if current == prior_hash => Decision::Skip,
        other => Decision::IndexHashed(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(size: u64, mtime: i64, hash: Option<&str>) -> Fingerprint {
        Fingerprint {
            size,
            mtime,
            content_hash: hash.map(String::from),
        }
    }

    fn never() -> Result<String, String> {
        panic!("hash should not be computed")
    }

    #[test]
    fn new_or_changed_files_are_indexed() {
        assert_eq!(decide(None, 1, 1, true, false, false, never), Decision::Index);
        let prev = fp(1, 1, None);
        assert_eq!(decide(Some(&prev), 2, 1, true, false, false, never), Decision::Index);
        assert_eq!(decide(Some(&prev), 1, 2, true, false, false, never), Decision::Index);
    }

    #[test]
    fn non_incremental_always_indexes() {
        let prev = fp(1, 1, None);
        assert_eq!(decide(Some(&prev), 1, 1, false, false, false, never), Decision::Index);
    }

    #[test]
    fn unchanged_without_hashing_is_skipped() {
        let prev = fp(1, 1, None);
        assert_eq!(decide(Some(&prev), 1, 1, true, false, false, never), Decision::Skip);
    }

    #[test]
    fn hashing_requires_prior_hash_to_skip() {
        let unhashed = fp(1, 1, None);
        assert_eq!(decide(Some(&unhashed), 1, 1, true, true, false, never), Decision::Index);
        let hashed = fp(1, 1, Some("abc"));
        assert_eq!(decide(Some(&hashed), 1, 1, true, true, false, never), Decision::Skip);
    }

    #[test]
    fn rehash_verifies_prior_hash() {
        let hashed = fp(1, 1, Some("abc"));
        let same = || Ok("abc".to_string());
        assert_eq!(decide(Some(&hashed), 1, 1, true, true, true, same), Decision::Skip);

        let changed = || Ok("def".to_string());
        assert_eq!(
            decide(Some(&hashed), 1, 1, true, true, true, changed),
            Decision::IndexHashed(Ok("def".to_string()))
        );

        let failed = || Err("permission denied".to_string());
        assert_eq!(
            decide(Some(&hashed), 1, 1, true, true, true, failed),
            Decision::IndexHashed(Err("permission denied".to_string()))
        );
    }

    #[test]
    fn save_and_load_roundtrip_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope/scan_state.json");

        let mut state = ScanState::default();
        state.insert("/m/a.als".into(), fp(10, 20, Some("h")));
        state.insert("/m/b.als".into(), fp(30, 40, None));
        state.save(&path).unwrap();

        assert!(!temp_path(&path).exists());
        let loaded = ScanState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.get("/m/a.als").unwrap().content_hash.as_deref(), Some("h"));
    }

    #[test]
    fn missing_or_corrupt_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_state.json");
        assert!(ScanState::load(&path).unwrap().is_empty());

        std::fs::write(&path, b"{not json").unwrap();
        assert!(ScanState::load(&path).unwrap().is_empty());
    }
}

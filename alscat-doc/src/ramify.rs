//! RAM-flag patcher.
//!
//! Sets `<Ram Value="true"/>` on every RAM flag nested under an `AudioClip`,
//! so the host loads those clips into memory instead of streaming from disk.
//! Tags are scanned lexically; bytes outside the rewritten attribute values
//! are carried over untouched.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::{decode, encode};
use crate::{DocError, Result};

const CLIP_TAG: &str = "AudioClip";
const RAM_TAG: &str = "Ram";

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(/?)([A-Za-z_][\w:.\-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("tag pattern must compile")
});

static RE_VALUE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bValue\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("value pattern must compile")
});

/// How `ramify_file` persists a patched document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RamifyMode {
    /// Count only; never write.
    #[default]
    DryRun,
    /// Overwrite the input after taking a one-time `.bak` copy.
    InPlace,
    /// Write `<stem>.ram<ext>` next to the input.
    Sibling,
}

/// Outcome of patching one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RamifyReport {
    pub path: PathBuf,
    pub audio_clips: usize,
    pub ram_flips: usize,
    pub written: Option<PathBuf>,
    pub backup: Option<PathBuf>,
}

/// Rewrite RAM flags under audio clips in decoded document text.
///
/// Returns the patched text with the number of audio clips seen and the
/// number of flags flipped.
pub fn flip_ram_flags(text: &str) -> (String, usize, usize) {
    let mut out = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut open: Vec<(&str, bool)> = Vec::new();
    let mut clip_depth = 0usize;
    let mut clips = 0usize;
    let mut flips = 0usize;

    for caps in RE_TAG.captures_iter(text) {
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let Some(raw_name) = caps.get(2) else {
            continue;
        };
        let name = local_name(raw_name.as_str());

        if closing {
            while let Some((open_name, is_clip)) = open.pop() {
                if is_clip {
                    clip_depth -= 1;
                }
                if open_name == name {
                    break;
                }
            }
            continue;
        }

        let attrs = caps.get(3);
        let self_closing = attrs.is_some_and(|m| m.as_str().trim_end().ends_with('/'));
        let is_clip = name == CLIP_TAG;
        if is_clip {
            clips += 1;
        }

        if name == RAM_TAG && clip_depth > 0 {
            if let Some(attrs) = attrs {
                if let Some(value) = RE_VALUE_ATTR.captures(attrs.as_str()) {
                    let current = value.get(1).or_else(|| value.get(2)).map_or("", |m| m.as_str());
                    if !current.eq_ignore_ascii_case("true") {
                        if let Some(whole) = value.get(0) {
                            let start = attrs.start() + whole.start();
                            out.push_str(&text[copied_to..start]);
                            out.push_str("Value=\"true\"");
                            copied_to = attrs.start() + whole.end();
                            flips += 1;
                        }
                    }
                }
            }
        }

        if !self_closing {
            open.push((name, is_clip));
            if is_clip {
                clip_depth += 1;
            }
        }
    }

    out.push_str(&text[copied_to..]);
    (out, clips, flips)
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Path of the one-time backup taken before an in-place write.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Path of the sibling output: `Song.als` becomes `Song.ram.als`.
pub fn sibling_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}.ram.{}", ext.to_string_lossy()),
        None => format!("{stem}.ram"),
    };
    path.with_file_name(file_name)
}

/// Copy `path` to its backup location unless a backup already exists.
///
/// Returns the backup path when a copy was made.
pub fn ensure_backup(path: &Path) -> Result<Option<PathBuf>> {
    let backup = backup_path(path);
    if backup.exists() {
        return Ok(None);
    }
    std::fs::copy(path, &backup).map_err(|e| DocError::Backup {
        path: backup.clone(),
        message: e.to_string(),
    })?;
    Ok(Some(backup))
}

/// Patch RAM flags in the document at `path`.
pub fn ramify_file(path: &Path, mode: RamifyMode, max_bytes: usize) -> Result<RamifyReport> {
    let bytes = std::fs::read(path)?;
    let text = decode(&bytes, max_bytes)?;
    let (patched, audio_clips, ram_flips) = flip_ram_flags(&text);

    let mut report = RamifyReport {
        path: path.to_path_buf(),
        audio_clips,
        ram_flips,
        written: None,
        backup: None,
    };

    let target = match mode {
        _ if ram_flips == 0 => None,
        RamifyMode::DryRun => None,
        RamifyMode::InPlace => Some(path.to_path_buf()),
        RamifyMode::Sibling => Some(sibling_path(path)),
    };
    let Some(target) = target else {
        debug!(
            path = %path.display(),
            audio_clips,
            ram_flips,
            ?mode,
            "Ramify made no changes"
        );
        return Ok(report);
    };

    let encoded = encode(&patched)?;
    if mode == RamifyMode::InPlace {
        report.backup = ensure_backup(path)?;
    }

    write_atomic(&target, &encoded)?;
    info!(
        path = %path.display(),
        target = %target.display(),
        audio_clips,
        ram_flips,
        "Ramify wrote document"
    );
    report.written = Some(target);
    Ok(report)
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = target.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, target)?;
    Ok(())
}

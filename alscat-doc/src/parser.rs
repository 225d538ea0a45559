//! Heuristic extraction of structural facts from project document text.
//!
//! The parser never builds a DOM. Each fact comes from an independent pattern
//! search over the decoded text, which keeps it tolerant of unknown elements
//! and of documents written by newer host versions.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum number of distinct device hints kept per document.
pub const MAX_DEVICE_HINTS: usize = 250;

/// Maximum length of the ordered device sequence kept per document.
pub const MAX_DEVICE_SEQUENCE: usize = 500;

/// Generic `Name`-style attribute values longer than this are ignored.
pub const MAX_GENERIC_NAME_CHARS: usize = 120;

static RE_TRACK_AUDIO: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<AudioTrack\b"));
static RE_TRACK_MIDI: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<MidiTrack\b"));
static RE_TRACK_RETURN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<ReturnTrack\b"));
static RE_TRACK_MASTER: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<MasterTrack\b"));
static RE_CLIP_AUDIO: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<AudioClip\b"));
static RE_CLIP_MIDI: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<MidiClip\b"));

// Windows drive, POSIX root or UNC root, then a lazy body up to a media extension.
static RE_SAMPLE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?i)((?:[A-Za-z]:\\|/|\\\\)[^<>"\r\n\t]+?\.(?:wav|aif|aiff|flac|mp3|m4a|ogg|asd))"#)
});

static RE_DEVICE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?i)(?:PluginName|PlugName|DeviceName|VstPlugin|AuPlugin|PluginDesc|Manufacturer)\s*=\s*"([^"]+)""#,
    )
});

static RE_NAME_ATTR: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"(?i)(?:\bName|\bDisplayName|\bShortName)\s*=\s*"([^"]+)""#));

static RE_TEMPO: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"(?i)<Tempo[^>]*Value="([0-9.]+)""#));

// Tempo stored as a child parameter: <Tempo><LomId .../><Manual Value="120"/>
static RE_TEMPO_MANUAL: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<Tempo\b[^>]*>.{0,512}?<Manual\s+Value="([0-9.]+)""#)
});

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static document pattern must compile")
}

/// Track counts by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackCounts {
    pub audio: u32,
    pub midi: u32,
    #[serde(rename = "return")]
    pub returns: u32,
    pub master: u32,
    pub total: u32,
}

/// Clip counts by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipCounts {
    pub audio: u32,
    pub midi: u32,
    pub total: u32,
}

/// Parsed facts for one project document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub tracks: TrackCounts,
    pub clips: ClipCounts,
    pub tempo: Option<f64>,
    /// Absolute-looking media paths, deduplicated and sorted.
    pub sample_refs: Vec<String>,
    /// Device/plugin name hints, deduplicated, sorted and capped.
    pub device_hints: Vec<String>,
    /// Device names in raw-text order with consecutive repeats collapsed.
    #[serde(default)]
    pub device_sequence: Vec<String>,
}

/// Seam for swapping the heuristic parser for a structured one.
pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, text: &str) -> DocumentSummary;
}

/// Pattern-based parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicParser;

impl DocumentParser for HeuristicParser {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn parse(&self, text: &str) -> DocumentSummary {
        let audio = count(&RE_TRACK_AUDIO, text);
        let midi = count(&RE_TRACK_MIDI, text);
        let returns = count(&RE_TRACK_RETURN, text);
        let master = count(&RE_TRACK_MASTER, text);

        let clip_audio = count(&RE_CLIP_AUDIO, text);
        let clip_midi = count(&RE_CLIP_MIDI, text);

        let (device_hints, device_sequence) = extract_devices(text);

        DocumentSummary {
            tracks: TrackCounts {
                audio,
                midi,
                returns,
                master,
                total: audio + midi + returns + master,
            },
            clips: ClipCounts {
                audio: clip_audio,
                midi: clip_midi,
                total: clip_audio + clip_midi,
            },
            tempo: extract_tempo(text),
            sample_refs: extract_sample_refs(text),
            device_hints,
            device_sequence,
        }
    }
}

fn count(re: &Regex, text: &str) -> u32 {
    u32::try_from(re.find_iter(text).count()).unwrap_or(u32::MAX)
}

fn extract_tempo(text: &str) -> Option<f64> {
    RE_TEMPO
        .captures(text)
        .or_else(|| RE_TEMPO_MANUAL.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn extract_sample_refs(text: &str) -> Vec<String> {
    let refs: BTreeSet<String> = RE_SAMPLE_PATH
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    refs.into_iter().collect()
}

/// Collect device hints (sorted, capped) and the ordered device sequence.
fn extract_devices(text: &str) -> (Vec<String>, Vec<String>) {
    let mut hits: Vec<(usize, String)> = Vec::new();

    for caps in RE_DEVICE_ATTR.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let value = m.as_str().trim();
            if !value.is_empty() {
                hits.push((m.start(), value.to_string()));
            }
        }
    }

    for caps in RE_NAME_ATTR.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let value = m.as_str().trim();
            let len = value.chars().count();
            if (1..=MAX_GENERIC_NAME_CHARS).contains(&len) {
                hits.push((m.start(), value.to_string()));
            }
        }
    }

    hits.sort_by_key(|(offset, _)| *offset);

    let mut sequence: Vec<String> = Vec::new();
    for (_, name) in &hits {
        if sequence.len() >= MAX_DEVICE_SEQUENCE {
            break;
        }
        if sequence.last() != Some(name) {
            sequence.push(name.clone());
        }
    }

    let hints: BTreeSet<String> = hits.into_iter().map(|(_, name)| name).collect();
    let hints = hints.into_iter().take(MAX_DEVICE_HINTS).collect();

    (hints, sequence)
}

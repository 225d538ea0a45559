// Integration test utilities and fixture management for alscat.

use std::path::{Path, PathBuf};

use alscat_core::config::CatalogConfig;
use alscat_core::pipeline::{self, UpdateReport};
use alscat_core::progress::NoopReporter;
use alscat_core::query::CatalogQuery;
use alscat_core::scan::snapshot::{self, SnapshotReader};
use alscat_core::scan::{self, ScanOptions, ScanSummary};
use alscat_core::types::Scope;

/// A project folder plus a separate catalog directory, both temporary.
#[derive(Debug)]
pub struct TestLibrary {
    pub root: tempfile::TempDir,
    pub catalog: tempfile::TempDir,
}

impl Default for TestLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLibrary {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create library tempdir"),
            catalog: tempfile::tempdir().expect("create catalog tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn catalog_dir(&self) -> &Path {
        self.catalog.path()
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        CatalogConfig::snapshot_dir(self.catalog_dir())
    }

    pub fn scope_snapshot(&self, scope: &Scope) -> PathBuf {
        snapshot::scope_dir(&self.snapshot_dir(), scope)
    }

    pub fn db_path(&self) -> PathBuf {
        CatalogConfig::default().db_path(self.catalog_dir())
    }

    /// Write `xml` as a gzip-compressed project document at `rel`.
    pub fn write_document(&self, rel: &str, xml: &str) -> PathBuf {
        let bytes = alscat_doc::encode(xml).expect("encode document");
        self.write_bytes(rel, &bytes)
    }

    /// Write a short 16-bit mono WAV at `rel`.
    pub fn write_wav(&self, rel: &str, frames: u32) -> PathBuf {
        let path = self.prepare(rel);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        for i in 0..frames {
            let sample = i16::try_from(i % 256).unwrap_or(0);
            writer.write_sample(sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
        path
    }

    pub fn write_bytes(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.prepare(rel);
        std::fs::write(&path, bytes).expect("write fixture file");
        path
    }

    fn prepare(&self, rel: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dirs");
        }
        path
    }

    /// `A.als` with one audio clip whose RAM flag is off, next to `B.wav`.
    pub fn single_clip_set() -> Self {
        let lib = Self::new();
        lib.write_document("A.als", &ProjectXml::new().audio_clip("False").build());
        lib.write_wav("B.wav", 64);
        lib
    }

    /// Scan the library root into the catalog's snapshots for `scope`.
    pub fn scan(&self, scope: &Scope, options: ScanOptions) -> ScanSummary {
        scan::scan_to_snapshot(
            self.path(),
            &self.snapshot_dir(),
            scope,
            options,
            None,
            &NoopReporter,
        )
        .expect("scan library")
    }

    /// Scan, append-ingest and recompute analytics with `config`.
    pub async fn update(&self, scope: &Scope, config: &CatalogConfig) -> UpdateReport {
        pipeline::update(
            self.catalog_dir(),
            self.path(),
            scope,
            config,
            None,
            &NoopReporter,
        )
        .await
        .expect("update catalog")
    }

    pub fn query(&self) -> CatalogQuery {
        CatalogQuery::open(&self.db_path()).expect("open catalog read-only")
    }

    /// Every record in one snapshot file of `scope`.
    pub fn read_snapshot<T: serde::de::DeserializeOwned>(&self, scope: &Scope, name: &str) -> Vec<T> {
        let path = self.scope_snapshot(scope).join(name);
        let mut reader = SnapshotReader::open(&path, 0).expect("open snapshot");
        let mut records = Vec::new();
        loop {
            let batch: Vec<T> = reader.next_batch(1_000).expect("read snapshot");
            if batch.is_empty() {
                break;
            }
            records.extend(batch);
        }
        records
    }
}

/// Builder for small project documents.
#[derive(Debug, Default)]
pub struct ProjectXml {
    tracks: Vec<String>,
}

impl ProjectXml {
    pub fn new() -> Self {
        Self::default()
    }

    /// An audio track holding one clip with the given RAM flag value.
    pub fn audio_clip(mut self, ram: &str) -> Self {
        self.tracks.push(format!(
            "<AudioTrack><ClipSlot><AudioClip Time=\"0\"><Ram Value=\"{ram}\"/></AudioClip></ClipSlot></AudioTrack>"
        ));
        self
    }

    /// An audio track with a clip that references `sample`.
    pub fn sample(mut self, sample: &Path) -> Self {
        self.tracks.push(format!(
            "<AudioTrack><AudioClip Time=\"0\"><SampleRef><FileRef><Path Value=\"{}\"/></FileRef></SampleRef><Ram Value=\"true\"/></AudioClip></AudioTrack>",
            sample.display()
        ));
        self
    }

    /// A MIDI track with devices in chain order.
    pub fn devices(mut self, devices: &[&str]) -> Self {
        let chain: String = devices
            .iter()
            .map(|d| format!("<Device DeviceName=\"{d}\"/>"))
            .collect();
        self.tracks.push(format!(
            "<MidiTrack><MidiClip Time=\"0\"/><DeviceChain>{chain}</DeviceChain></MidiTrack>"
        ));
        self
    }

    pub fn build(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Ableton><LiveSet><Tempo><Manual Value=\"120\"/></Tempo><Tracks>{}</Tracks><MasterTrack/></LiveSet></Ableton>\n",
            self.tracks.concat()
        )
    }
}

pub fn media_options() -> ScanOptions {
    ScanOptions {
        include_media: true,
        ..ScanOptions::default()
    }
}

/// Config that indexes media, for analytics over audio files.
pub fn media_config() -> CatalogConfig {
    let mut config = CatalogConfig::default();
    config.scan.include_media = true;
    config
}

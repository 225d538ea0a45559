//! JSON-lines snapshot files shared by the scanner and the ingestion layer.
//!
//! Layout under the catalog directory:
//!
//! ```text
//! <out>/<scope>/file_index.jsonl
//! <out>/<scope>/documents.jsonl
//! <out>/<scope>/refs_graph.jsonl
//! <out>/<scope>/scan_state.json
//! <out>/<scope>/scan_summary.json
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{IngestError, ScanError};
use crate::scan::EventSink;
use crate::types::{Scope, ScanEvent};

pub const FILE_INDEX: &str = "file_index.jsonl";
pub const DOCUMENTS: &str = "documents.jsonl";
pub const REFS_GRAPH: &str = "refs_graph.jsonl";
pub const SCAN_STATE: &str = "scan_state.json";
pub const SCAN_SUMMARY: &str = "scan_summary.json";

/// Snapshot files written for every scope, in ingest order.
pub const SNAPSHOT_SOURCES: &[&str] = &[FILE_INDEX, DOCUMENTS, REFS_GRAPH];

/// Directory holding one scope's snapshot files.
pub fn scope_dir(out: &Path, scope: &Scope) -> PathBuf {
    out.join(scope.as_str())
}

/// Append-only writer for one scope's JSONL snapshots.
#[derive(Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    files: BufWriter<File>,
    documents: BufWriter<File>,
    refs: BufWriter<File>,
}

impl SnapshotWriter {
    /// Open (creating if needed) the snapshot files under `dir` for appending.
    pub fn open(dir: &Path) -> Result<Self, ScanError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: open_append(&dir.join(FILE_INDEX))?,
            documents: open_append(&dir.join(DOCUMENTS))?,
            refs: open_append(&dir.join(REFS_GRAPH))?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_line<T: Serialize>(
        writer: &mut BufWriter<File>,
        dir: &Path,
        name: &str,
        record: &T,
    ) -> Result<(), ScanError> {
        serde_json::to_writer(&mut *writer, record).map_err(|e| ScanError::Snapshot {
            path: dir.join(name),
            message: e.to_string(),
        })?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>, ScanError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl EventSink for SnapshotWriter {
    fn emit(&mut self, event: ScanEvent) -> Result<(), ScanError> {
        match &event {
            ScanEvent::File(record) => {
                Self::write_line(&mut self.files, &self.dir, FILE_INDEX, record)
            }
            ScanEvent::Document(record) => {
                Self::write_line(&mut self.documents, &self.dir, DOCUMENTS, record)
            }
            ScanEvent::Reference(edge) => {
                Self::write_line(&mut self.refs, &self.dir, REFS_GRAPH, edge)
            }
        }
    }

    fn flush(&mut self) -> Result<(), ScanError> {
        self.files.flush()?;
        self.documents.flush()?;
        self.refs.flush()?;
        Ok(())
    }
}

/// blake3 digest of a snapshot's first complete line, or `None` while the file
/// holds no complete line. Appends keep it stable; a rewritten file changes it.
pub fn head_digest(path: &Path) -> Result<Option<String>, IngestError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut first = Vec::new();
    reader.read_until(b'\n', &mut first)?;
    if !first.ends_with(b"\n") {
        return Ok(None);
    }
    Ok(Some(blake3::hash(&first).to_hex().to_string()))
}

/// Streams records from a JSONL snapshot starting at a byte offset.
///
/// Only newline-terminated lines are consumed, so a line still being written
/// by a concurrent scan is left for the next read.
#[derive(Debug)]
pub struct SnapshotReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    line_no: u64,
    buf: String,
}

impl SnapshotReader {
    /// Open `path` at `offset`. Offsets past the end of the file (the file was
    /// truncated or replaced) restart from the beginning.
    pub fn open(path: &Path, offset: u64) -> Result<Self, IngestError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let offset = if offset > len { 0 } else { offset };
        file.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset,
            line_no: 0,
            buf: String::new(),
        })
    }

    /// Byte offset just past the last fully consumed line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read up to `max` records. An empty batch means the snapshot is drained.
    pub fn next_batch<T: DeserializeOwned>(&mut self, max: usize) -> Result<Vec<T>, IngestError> {
        let mut batch = Vec::with_capacity(max.min(1024));
        while batch.len() < max {
            self.buf.clear();
            let read = self.reader.read_line(&mut self.buf)?;
            if read == 0 || !self.buf.ends_with('\n') {
                break;
            }
            self.offset += read as u64;
            self.line_no += 1;

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| IngestError::Malformed {
                path: self.path.clone(),
                line: self.line_no,
                message: e.to_string(),
            })?;
            batch.push(record);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileKind, FileRecord, RefEdge, RefKind};

    fn file_record(path: &str, size: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            path_hash: "h".into(),
            ext: "als".into(),
            size,
            mtime: 1,
            ctime: None,
            name: "a.als".into(),
            parent: "/m".into(),
            mime: None,
            kind: FileKind::Document,
            scanned_at: 1,
            scope: Scope::default(),
            content_hash: None,
            hash_error: None,
            audio: None,
        }
    }

    #[test]
    fn head_digest_survives_appends_but_not_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let scope_path = scope_dir(dir.path(), &Scope::default());
        let path = scope_path.join(FILE_INDEX);
        {
            let mut writer = SnapshotWriter::open(&scope_path).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(head_digest(&path).unwrap(), None);

        {
            let mut writer = SnapshotWriter::open(&scope_path).unwrap();
            writer.emit(ScanEvent::File(file_record("/m/a.als", 1))).unwrap();
            writer.flush().unwrap();
        }
        let first = head_digest(&path).unwrap();
        assert!(first.is_some());

        {
            let mut writer = SnapshotWriter::open(&scope_path).unwrap();
            writer.emit(ScanEvent::File(file_record("/m/b.als", 2))).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(head_digest(&path).unwrap(), first);

        std::fs::remove_file(&path).unwrap();
        {
            let mut writer = SnapshotWriter::open(&scope_path).unwrap();
            writer.emit(ScanEvent::File(file_record("/m/c.als", 3))).unwrap();
            writer.flush().unwrap();
        }
        assert_ne!(head_digest(&path).unwrap(), first);
    }

    #[test]
    fn writer_appends_per_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let scope_path = scope_dir(dir.path(), &Scope::default());
        {
            let mut writer = SnapshotWriter::open(&scope_path).unwrap();
            writer.emit(ScanEvent::File(file_record("/m/a.als", 1))).unwrap();
            writer
                .emit(ScanEvent::Reference(RefEdge {
                    src: "/m/a.als".into(),
                    src_kind: "als".into(),
                    ref_kind: RefKind::Sample,
                    ref_path: "/s/kick.wav".into(),
                    exists: false,
                    scanned_at: 1,
                    scope: Scope::default(),
                }))
                .unwrap();
            writer.flush().unwrap();
        }
        {
            let mut writer = SnapshotWriter::open(&scope_path).unwrap();
            writer.emit(ScanEvent::File(file_record("/m/b.als", 2))).unwrap();
            writer.flush().unwrap();
        }

        let files = std::fs::read_to_string(scope_path.join(FILE_INDEX)).unwrap();
        assert_eq!(files.lines().count(), 2);
        let refs = std::fs::read_to_string(scope_path.join(REFS_GRAPH)).unwrap();
        assert!(refs.contains("\"ref_kind\":\"sample\""));
        assert!(scope_path.join(DOCUMENTS).exists());
    }

    #[test]
    fn reader_batches_and_tracks_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_INDEX);
        let mut text = String::new();
        for i in 0..5 {
            text.push_str(&serde_json::to_string(&file_record(&format!("/m/{i}.als"), i)).unwrap());
            text.push('\n');
        }
        std::fs::write(&path, &text).unwrap();

        let mut reader = SnapshotReader::open(&path, 0).unwrap();
        let first: Vec<FileRecord> = reader.next_batch(3).unwrap();
        assert_eq!(first.len(), 3);
        let rest: Vec<FileRecord> = reader.next_batch(3).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(reader.next_batch::<FileRecord>(3).unwrap().is_empty());
        assert_eq!(reader.offset(), text.len() as u64);

        // Resume from the stored offset: nothing new.
        let mut resumed = SnapshotReader::open(&path, reader.offset()).unwrap();
        assert!(resumed.next_batch::<FileRecord>(10).unwrap().is_empty());
    }

    #[test]
    fn partial_trailing_line_is_left_unread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_INDEX);
        let full = serde_json::to_string(&file_record("/m/a.als", 1)).unwrap();
        std::fs::write(&path, format!("{full}\n{{\"path\":")).unwrap();

        let mut reader = SnapshotReader::open(&path, 0).unwrap();
        let batch: Vec<FileRecord> = reader.next_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(reader.offset(), full.len() as u64 + 1);
    }

    #[test]
    fn malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_INDEX);
        std::fs::write(&path, "\n{\"oops\": true}\n").unwrap();

        let mut reader = SnapshotReader::open(&path, 0).unwrap();
        let err = reader.next_batch::<FileRecord>(10).unwrap_err();
        assert!(matches!(err, IngestError::Malformed { line: 2, .. }));
    }

    #[test]
    fn stale_offset_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_INDEX);
        let line = serde_json::to_string(&file_record("/m/a.als", 1)).unwrap();
        std::fs::write(&path, format!("{line}\n")).unwrap();

        let mut reader = SnapshotReader::open(&path, 10_000).unwrap();
        assert_eq!(reader.next_batch::<FileRecord>(10).unwrap().len(), 1);
    }
}

use alscat_core::config::CatalogConfig;
use alscat_core::query::DocumentFilter;
use alscat_core::scan::ScanState;
use alscat_core::scan::snapshot::{DOCUMENTS, FILE_INDEX, SCAN_STATE};
use alscat_core::types::{DocumentRecord, FileKind, FileRecord, Scope, ScopeSelector};
use alscat_doc::ramify::{self, RamifyMode};
use alscat_doc::DEFAULT_MAX_DECOMPRESSED;
use alscat_test::{ProjectXml, TestLibrary, media_config, media_options};

// ── Scan and patch ───────────────────────────────────────────────

#[test]
fn scan_then_ramify_single_clip_set() {
    let lib = TestLibrary::single_clip_set();
    let scope = Scope::default();

    let summary = lib.scan(&scope, media_options());
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.documents_parsed, 1);

    let files: Vec<FileRecord> = lib.read_snapshot(&scope, FILE_INDEX);
    assert_eq!(files.len(), 2, "one document and one media file");
    assert!(files.iter().any(|f| f.kind == FileKind::Media && f.name == "B.wav"));

    let docs: Vec<DocumentRecord> = lib.read_snapshot(&scope, DOCUMENTS);
    assert_eq!(docs.len(), 1);
    let parsed = docs[0].summary.as_ref().expect("A.als should parse");
    assert_eq!(parsed.clips.audio, 1);

    let doc = lib.path().join("A.als");
    let original = std::fs::read(&doc).unwrap();

    let dry = ramify::ramify_file(&doc, RamifyMode::DryRun, DEFAULT_MAX_DECOMPRESSED).unwrap();
    assert_eq!((dry.audio_clips, dry.ram_flips), (1, 1));
    assert!(dry.written.is_none());
    assert_eq!(std::fs::read(&doc).unwrap(), original, "dry run must not write");
    assert!(!ramify::backup_path(&doc).exists());

    let applied = ramify::ramify_file(&doc, RamifyMode::InPlace, DEFAULT_MAX_DECOMPRESSED).unwrap();
    assert_eq!(applied.ram_flips, 1);
    let backup = ramify::backup_path(&doc);
    assert!(backup.exists(), "in-place patch keeps a .bak copy");
    assert_eq!(std::fs::read(&backup).unwrap(), original);

    let text = alscat_doc::decode_file(&doc, DEFAULT_MAX_DECOMPRESSED).unwrap();
    assert!(text.contains(r#"<Ram Value="true"/>"#));
    assert!(!text.contains(r#"Value="False""#));

    // A second pass has nothing left to flip and leaves the backup alone.
    let again = ramify::ramify_file(&doc, RamifyMode::InPlace, DEFAULT_MAX_DECOMPRESSED).unwrap();
    assert_eq!(again.ram_flips, 0);
    assert_eq!(std::fs::read(&backup).unwrap(), original);
}

#[test]
fn incremental_rescan_of_unchanged_tree_is_idempotent() {
    let lib = TestLibrary::single_clip_set();
    let scope = Scope::default();
    let state_path = lib.scope_snapshot(&scope).join(SCAN_STATE);

    let first = lib.scan(&scope, media_options());
    let state_after_first = ScanState::load(&state_path).unwrap();
    let docs_after_first: Vec<DocumentRecord> = lib.read_snapshot(&scope, DOCUMENTS);

    let second = lib.scan(&scope, media_options());
    assert_eq!(first.indexed, 2);
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);

    let files: Vec<FileRecord> = lib.read_snapshot(&scope, FILE_INDEX);
    let docs: Vec<DocumentRecord> = lib.read_snapshot(&scope, DOCUMENTS);
    assert_eq!(files.len(), 2, "no new file records");
    assert_eq!(docs.len(), docs_after_first.len(), "no new document records");
    assert_eq!(ScanState::load(&state_path).unwrap(), state_after_first);
}

// ── Catalog and analytics ────────────────────────────────────────

#[tokio::test]
async fn missing_samples_group_into_one_hotspot() {
    let lib = TestLibrary::new();
    let present = lib.write_wav("Samples/Kept/snare.wav", 32);
    let missing_dir = lib.path().join("Samples/Missing");
    let xml = ProjectXml::new()
        .sample(&missing_dir.join("kick.wav"))
        .sample(&missing_dir.join("hat.wav"))
        .sample(&present)
        .build();
    lib.write_document("Song.als", &xml);

    let report = lib.update(&Scope::default(), &media_config()).await;
    assert_eq!(report.scan.refs_total, 3);
    assert_eq!(report.scan.refs_missing, 2);

    let hotspots = lib
        .query()
        .missing_hotspots(&ScopeSelector::All, None)
        .unwrap();
    assert_eq!(hotspots.len(), 1, "both missing samples share a directory");
    assert_eq!(hotspots[0].row.directory, missing_dir.display().to_string());
    assert_eq!(hotspots[0].row.missing_count, 2);
}

#[tokio::test]
async fn changed_document_is_upserted_not_duplicated() {
    let lib = TestLibrary::new();
    let scope = Scope::default();
    let config = CatalogConfig::default();
    lib.write_document("Song.als", &ProjectXml::new().audio_clip("true").build());
    lib.update(&scope, &config).await;

    let bigger = ProjectXml::new()
        .audio_clip("true")
        .audio_clip("false")
        .devices(&["Eq Eight", "Compressor"])
        .build();
    let path = lib.write_document("Song.als", &bigger);
    let new_size = std::fs::metadata(&path).unwrap().len();

    let second = lib.update(&scope, &config).await;
    assert_eq!(second.scan.indexed, 1);

    let docs = lib.query().documents(&DocumentFilter::default()).unwrap();
    assert_eq!(docs.len(), 1, "one row per path");
    assert_eq!(docs[0].size, new_size);
    assert_eq!(docs[0].clips_total, 3);
}

#[tokio::test]
async fn device_chains_and_usage_span_documents() {
    let lib = TestLibrary::new();
    lib.write_document(
        "One.als",
        &ProjectXml::new()
            .devices(&["Eq Eight", "Compressor", "Reverb"])
            .build(),
    );
    lib.write_document(
        "Two.als",
        &ProjectXml::new().devices(&["Eq Eight", "Compressor"]).build(),
    );
    let mut config = CatalogConfig::default();
    config.analytics.chain_len = 2;
    lib.update(&Scope::default(), &config).await;

    let query = lib.query();
    let chains = query.top_chains(&ScopeSelector::All, Some(2), None).unwrap();
    assert_eq!(chains[0].row.chain, "Eq Eight > Compressor");
    assert_eq!(chains[0].row.usage_count, 2);
    assert!(chains.iter().any(|c| c.row.chain == "Compressor > Reverb" && c.row.usage_count == 1));

    let devices = query.top_devices(&ScopeSelector::All, None).unwrap();
    let eq = devices.iter().find(|d| d.row.device == "Eq Eight").unwrap();
    assert_eq!(eq.row.doc_count, 2);

    let pairs = query.device_pairs(&ScopeSelector::All, None).unwrap();
    let top = &pairs[0].row;
    assert_eq!((top.device_a.as_str(), top.device_b.as_str()), ("Compressor", "Eq Eight"));
    assert_eq!(top.count, 2);
}

#[tokio::test]
async fn broken_sets_rank_worst_and_backups_stay_hidden() {
    let lib = TestLibrary::new();
    let gone = lib.path().join("Gone/loop.wav");
    lib.write_document("Healthy.als", &ProjectXml::new().audio_clip("true").build());
    lib.write_document("Broken.als", &ProjectXml::new().sample(&gone).build());
    lib.write_document(
        "Backup/Healthy [2024-01-02 101500].als",
        &ProjectXml::new().audio_clip("true").build(),
    );
    lib.update(&Scope::default(), &CatalogConfig::default()).await;

    let query = lib.query();
    let health = query.worst_health(&ScopeSelector::All, None).unwrap();
    assert!(health[0].row.path.ends_with("Broken.als"));
    assert_eq!(health[0].row.missing_refs, 1);

    let visible = query.documents(&DocumentFilter::default()).unwrap();
    assert_eq!(visible.len(), 2);
    let all = query
        .documents(&DocumentFilter {
            include_backups: true,
            ..DocumentFilter::default()
        })
        .unwrap();
    assert_eq!(all.len(), 3);

    let missing_only = query
        .documents(&DocumentFilter {
            missing_only: true,
            ..DocumentFilter::default()
        })
        .unwrap();
    assert_eq!(missing_only.len(), 1);
    assert!(missing_only[0].path.ends_with("Broken.als"));
}

#[tokio::test]
async fn scopes_are_queried_independently() {
    let lib = TestLibrary::new();
    lib.write_document("Song.als", &ProjectXml::new().devices(&["Utility"]).build());
    let config = CatalogConfig::default();
    let recordings = Scope::new("live_recordings").unwrap();
    let library = Scope::new("user_library").unwrap();
    lib.update(&recordings, &config).await;

    let query = lib.query();
    let in_recordings = query
        .top_devices(&ScopeSelector::One(recordings.clone()), None)
        .unwrap();
    assert_eq!(in_recordings.len(), 1);
    assert_eq!(in_recordings[0].scope, recordings);
    let in_library = query.top_devices(&ScopeSelector::One(library), None).unwrap();
    assert!(in_library.is_empty());
}

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn alscat() -> Command {
    let mut cmd = Command::cargo_bin("alscat").unwrap();
    cmd.env_remove("ALSCAT_CATALOG").env_remove("RUST_LOG");
    cmd
}

const SET: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Ableton><LiveSet><Tracks>\
<AudioTrack><AudioClip Time=\"0\"><Ram Value=\"False\"/></AudioClip></AudioTrack>\
<MidiTrack><DeviceChain><Device DeviceName=\"Eq Eight\"/><Device DeviceName=\"Compressor\"/>\
<Device DeviceName=\"Reverb\"/></DeviceChain></MidiTrack></Tracks></LiveSet></Ableton>\n";

fn write_set(path: &Path) {
    std::fs::write(path, alscat_doc::encode(SET).unwrap()).unwrap();
}

#[test]
fn help_lists_subcommands() {
    alscat()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("ramify"))
        .stdout(predicate::str::contains("maintain"));
}

#[test]
fn status_without_catalog_exits_not_found() {
    let dir = tempfile::tempdir().unwrap();
    alscat()
        .args(["status", "--catalog"])
        .arg(dir.path().join("nowhere"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not a catalog"));
}

#[test]
fn conflicting_build_modes_exit_usage() {
    let dir = tempfile::tempdir().unwrap();
    alscat()
        .args(["build", "--overwrite", "--append", "--catalog"])
        .arg(dir.path())
        .assert()
        .code(2);
}

#[test]
fn scan_of_missing_root_exits_not_found() {
    let dir = tempfile::tempdir().unwrap();
    alscat()
        .arg("scan")
        .arg(dir.path().join("absent"))
        .arg("--catalog")
        .arg(dir.path().join("catalog"))
        .assert()
        .code(3);
}

#[test]
fn scan_build_analyze_query_flow() {
    let root = tempfile::tempdir().unwrap();
    let catalog = tempfile::tempdir().unwrap();
    write_set(&root.path().join("Song.als"));

    alscat()
        .arg("-q")
        .arg("scan")
        .arg(root.path())
        .arg("--catalog")
        .arg(catalog.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Documents parsed: 1"));

    alscat()
        .args(["-q", "build", "--catalog"])
        .arg(catalog.path())
        .assert()
        .success();

    alscat()
        .args(["analyze", "--chain-len", "2", "--catalog"])
        .arg(catalog.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Analytics recomputed"));

    let output = alscat()
        .args(["query", "chains", "--format", "json", "--catalog"])
        .arg(catalog.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let chains: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["chain"].as_str().unwrap())
        .collect();
    assert_eq!(chains, vec!["Compressor > Reverb", "Eq Eight > Compressor"]);

    alscat()
        .args(["query", "documents", "--catalog"])
        .arg(catalog.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Song.als"));

    alscat()
        .args(["query", "devices", "--limit", "0", "--catalog"])
        .arg(catalog.path())
        .assert()
        .code(2);

    alscat()
        .args(["status", "--catalog"])
        .arg(catalog.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema version"));

    // A second plain build refuses to clobber the catalog.
    alscat()
        .args(["-q", "build", "--catalog"])
        .arg(catalog.path())
        .assert()
        .failure();
}

#[test]
fn ramify_dry_run_reports_counts_without_writing() {
    let root = tempfile::tempdir().unwrap();
    let doc = root.path().join("Song.als");
    write_set(&doc);
    let before = std::fs::read(&doc).unwrap();

    alscat()
        .arg("ramify")
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("AudioClips=1 RamFlips=1"))
        .stdout(predicate::str::contains("dry run"));
    assert_eq!(std::fs::read(&doc).unwrap(), before);
    assert!(!root.path().join("Song.als.bak").exists());

    alscat()
        .arg("ramify")
        .arg("--in-place")
        .arg(&doc)
        .assert()
        .success();
    assert!(root.path().join("Song.als.bak").exists());
    let text = alscat_doc::decode_file(&doc, alscat_doc::DEFAULT_MAX_DECOMPRESSED).unwrap();
    assert!(text.contains(r#"<Ram Value="true"/>"#));
}

#[test]
fn clean_removes_scope_snapshots() {
    let root = tempfile::tempdir().unwrap();
    let catalog = tempfile::tempdir().unwrap();
    write_set(&root.path().join("Song.als"));

    alscat()
        .args(["-q", "scan"])
        .arg(root.path())
        .arg("--catalog")
        .arg(catalog.path())
        .assert()
        .success();
    let scope_dir = catalog.path().join("snapshots/live_recordings");
    assert!(scope_dir.join("file_index.jsonl").exists());

    alscat()
        .args(["clean", "--scope", "live_recordings", "--catalog"])
        .arg(catalog.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    assert!(!scope_dir.exists());
}

//! CLI smoke tests for the `docport` binary.
//!
//! The config uses the hash embedding provider, so ingestion and purge run
//! fully offline. Flows that need a chat model are exercised only for
//! their configuration errors here; the scripted end-to-end coverage lives
//! in `pipeline.rs`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docport_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docport");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    fs::write(
        root.join("files/notes.txt"),
        "Meeting notes.\n\nThe rollout starts in October.\n\nSecurity review is complete.",
    )
    .unwrap();
    fs::write(root.join("files/data.json"), "{\"not\": \"ingestible\"}").unwrap();

    let config_content = format!(
        r#"[storage]
root = "{}/sessions"
keep_latest = 2

[chunking]
chunk_size = 200
overlap = 20

[embedding]
provider = "hash"
dims = 32
"#,
        root.display()
    );

    let config_path = root.join("config/docport.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docport(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docport_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docport binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Pull the session id out of `ingest` output ("Session: <id>").
fn session_id_from(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Session: "))
        .expect("ingest output contains a session id")
        .trim()
        .to_string()
}

#[test]
fn ingest_creates_session_and_reports_chunks() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("files/notes.txt");

    let (stdout, stderr, success) =
        run_docport(&config_path, &["ingest", notes.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("ingested notes.txt"), "stdout: {}", stdout);

    let id = session_id_from(&stdout);
    let session_dir = tmp.path().join("sessions").join(&id);
    assert!(session_dir.join("raw/notes.txt").is_file());
    assert!(session_dir.join("index/index.db").is_file());
}

#[test]
fn ingest_skips_unsupported_and_fails_on_empty_batch() {
    let (tmp, config_path) = setup_test_env();
    let json = tmp.path().join("files/data.json");

    let (_stdout, stderr, success) =
        run_docport(&config_path, &["ingest", json.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("no valid documents"), "stderr: {}", stderr);
}

#[test]
fn ingest_append_reuses_session() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("files/notes.txt");

    let (stdout, _, success) = run_docport(&config_path, &["ingest", notes.to_str().unwrap()]);
    assert!(success);
    let id = session_id_from(&stdout);

    let (stdout, stderr, success) = run_docport(
        &config_path,
        &[
            "ingest",
            notes.to_str().unwrap(),
            "--session",
            &id,
            "--mode",
            "append",
        ],
    );
    assert!(success, "append failed: {}", stderr);
    assert_eq!(session_id_from(&stdout), id);
}

#[test]
fn ingest_chunking_flags_override_config() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("files/notes.txt");

    // At chunk_size 30 the notes file cannot fit a single chunk.
    let (stdout, stderr, success) = run_docport(
        &config_path,
        &[
            "ingest",
            notes.to_str().unwrap(),
            "--chunk-size",
            "30",
            "--overlap",
            "0",
        ],
    );
    assert!(success, "ingest failed: {}", stderr);
    assert!(!stdout.contains("(1 chunks)"), "stdout: {}", stdout);

    let (_stdout, stderr, success) = run_docport(
        &config_path,
        &[
            "ingest",
            notes.to_str().unwrap(),
            "--chunk-size",
            "30",
            "--overlap",
            "30",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("strictly less"), "stderr: {}", stderr);
}

#[test]
fn purge_keeps_configured_number_of_sessions() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("files/notes.txt");

    for _ in 0..3 {
        let (_, stderr, success) =
            run_docport(&config_path, &["ingest", notes.to_str().unwrap()]);
        assert!(success, "ingest failed: {}", stderr);
    }

    let (stdout, stderr, success) = run_docport(&config_path, &["purge"]);
    assert!(success, "purge failed: {}", stderr);
    assert!(stdout.contains("Removed 1 session(s)"), "stdout: {}", stdout);

    let remaining = fs::read_dir(tmp.path().join("sessions"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();
    assert_eq!(remaining, 2);
}

#[test]
fn ask_requires_a_configured_llm() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("files/notes.txt");

    let (stdout, _, success) = run_docport(&config_path, &["ingest", notes.to_str().unwrap()]);
    assert!(success);
    let id = session_id_from(&stdout);

    let (_stdout, stderr, success) = run_docport(
        &config_path,
        &["ask", "When is the rollout?", "--session", &id],
    );
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn unknown_ingest_mode_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("files/notes.txt");

    let (_stdout, stderr, success) = run_docport(
        &config_path,
        &["ingest", notes.to_str().unwrap(), "--mode", "merge"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown ingest mode"), "stderr: {}", stderr);
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn amis_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("amis");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/amis.sqlite"

[retrieval]
max_context_lines = 40

[generative]
api_key_env = "AMIS_INTEGRATION_TEST_KEY"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("amis.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_amis(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = amis_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("AMIS_INTEGRATION_TEST_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run amis binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn run_ok(config_path: &Path, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_amis(config_path, args);
    assert!(
        success,
        "{:?} failed: stdout={}, stderr={}",
        args, stdout, stderr
    );
    stdout
}

/// Init plus a small seeded corpus.
fn seeded() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);
    run_ok(&config_path, &["tag", "add", "n", "--description", "noun"]);
    run_ok(&config_path, &["vocab", "add", "kaka", "--chinese", "哥哥", "--pos", "n"]);
    run_ok(&config_path, &["sentence", "add", "O kaka ako.", "他是我哥哥"]);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let stdout = run_ok(&config_path, &["init"]);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/amis.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_amis(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_amis(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, success) = run_amis(Path::new("/nonexistent/amis.toml"), &["init"]);
    assert!(!success, "expected failure: stdout={}", stdout);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_vocab_add_requires_known_tag() {
    let (_tmp, config_path) = setup_test_env();
    run_ok(&config_path, &["init"]);

    let (_, stderr, success) = run_amis(
        &config_path,
        &["vocab", "add", "kaka", "--chinese", "哥哥", "--pos", "noun"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown part of speech tag"));

    run_ok(&config_path, &["tag", "add", "noun"]);
    let stdout = run_ok(
        &config_path,
        &["vocab", "add", "kaka", "--chinese", "哥哥", "--pos", "noun"],
    );
    assert!(stdout.contains("Added vocabulary #1"));

    let list = run_ok(&config_path, &["vocab", "list"]);
    assert!(list.contains("kaka"));
    assert!(list.contains("哥哥"));
}

#[test]
fn test_sentence_add_creates_stubs() {
    let (_tmp, config_path) = seeded();

    let list = run_ok(&config_path, &["vocab", "list"]);
    // "kaka" existed; "o" and "ako" were added as stubs
    assert!(list.contains(" ako "));
    let stats = run_ok(&config_path, &["stats"]);
    assert!(stats.contains("Vocabulary:  3"), "stats: {}", stats);
    assert!(stats.contains("Untranslated: 2 / 3"), "stats: {}", stats);
    assert!(stats.contains("Sentences:   1"), "stats: {}", stats);
}

#[test]
fn test_lookup_and_context() {
    let (_tmp, config_path) = seeded();

    let lookup = run_ok(&config_path, &["lookup", "kaka"]);
    assert!(lookup.contains("[vocab] kaka : 哥哥 (n)"), "lookup: {}", lookup);
    assert!(lookup.contains("[sentence] O kaka ako. || 他是我哥哥"));

    let reverse = run_ok(&config_path, &["lookup", "哥哥", "--direction", "c2a"]);
    assert!(reverse.contains("[vocab] kaka : 哥哥 (n)"), "reverse: {}", reverse);

    let context = run_ok(&config_path, &["context", "O kaka ako?"]);
    assert!(context.contains("Exact translation: 他是我哥哥"), "context: {}", context);
    assert!(context.contains("[Amis corpus retrieval results]"));
}

#[test]
fn test_lookup_without_matches() {
    let (_tmp, config_path) = seeded();
    let stdout = run_ok(&config_path, &["lookup", "zzz"]);
    assert!(stdout.contains("No matches"));
}

#[test]
fn test_dump_format() {
    let (_tmp, config_path) = seeded();

    let dump = run_ok(&config_path, &["dump"]);
    assert_eq!(
        dump,
        "==V==\n\
         kaka,哥哥,n\n\
         o,,|from sentence: O kaka ako.\n\
         ako,,|from sentence: O kaka ako.\n\
         ==S==\n\
         O kaka ako.||他是我哥哥\n"
    );
}

#[test]
fn test_import_rejects_missing_column() {
    let (tmp, config_path) = seeded();

    let csv = tmp.path().join("vocab.csv");
    fs::write(&csv, "amis,chinese\nwawa,孩子\n").unwrap();

    let (_, stderr, success) = run_amis(
        &config_path,
        &["import", "vocabulary", csv.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("part_of_speech"), "stderr: {}", stderr);

    let list = run_ok(&config_path, &["vocab", "list"]);
    assert!(list.contains("kaka"));
    assert!(!list.contains("wawa"));
}

#[test]
fn test_export_import_roundtrip() {
    let (tmp, config_path) = seeded();
    let out = tmp.path().join("out/vocab.jsonl");

    run_ok(
        &config_path,
        &["export", "vocabulary", "--output", out.to_str().unwrap()],
    );
    let before = run_ok(&config_path, &["dump"]);

    let stdout = run_ok(
        &config_path,
        &["import", "vocabulary", out.to_str().unwrap()],
    );
    assert!(stdout.contains("Imported 3 rows"));

    let after = run_ok(&config_path, &["dump"]);
    assert_eq!(before, after);
}

#[test]
fn test_csv_export_has_header() {
    let (_tmp, config_path) = seeded();
    let csv = run_ok(&config_path, &["export", "sentences", "--format", "csv"]);
    assert!(csv.starts_with("id,amis,chinese,english,note,created_at\n"));
}

#[test]
fn test_tag_rename_cascades() {
    let (_tmp, config_path) = seeded();

    let stdout = run_ok(&config_path, &["tag", "rename", "n", "noun"]);
    assert!(stdout.contains("1 entries updated"));

    let tags = run_ok(&config_path, &["tag", "list"]);
    assert!(tags.contains("noun"));
    let dump = run_ok(&config_path, &["dump"]);
    assert!(dump.contains("kaka,哥哥,noun\n"));
}

#[test]
fn test_delete_renumbers() {
    let (_tmp, config_path) = seeded();

    run_ok(&config_path, &["vocab", "delete", "1"]);
    let list = run_ok(&config_path, &["vocab", "list"]);
    let ids: Vec<&str> = list
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    assert_eq!(ids, vec!["2", "1"]);

    let (_, stderr, success) = run_amis(&config_path, &["vocab", "delete", "9"]);
    assert!(!success);
    assert!(stderr.contains("no such vocabulary entry"));
}

#[test]
fn test_reorder_all() {
    let (_tmp, config_path) = seeded();
    let stdout = run_ok(&config_path, &["reorder"]);
    assert!(stdout.contains("Renumbered vocabulary: ids 1..3"));
    assert!(stdout.contains("Renumbered sentence_pairs: ids 1..1"));
}

#[test]
fn test_ask_without_key_fails() {
    let (_tmp, config_path) = seeded();
    let (_, stderr, success) = run_amis(&config_path, &["ask", "O kaka ako"]);
    assert!(!success);
    assert!(stderr.contains("AMIS_INTEGRATION_TEST_KEY"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_direction_rejected() {
    let (_tmp, config_path) = seeded();
    let (_, stderr, success) = run_amis(&config_path, &["lookup", "kaka", "--direction", "up"]);
    assert!(!success);
    assert!(stderr.contains("Unknown direction"));
}

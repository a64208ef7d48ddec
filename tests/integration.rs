use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn aasx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("aasx-index");
    path
}

fn environment(id: &str, id_short: &str, speed: u32) -> String {
    format!(
        r#"{{
  "assetAdministrationShells": [{{"id": "{id}", "idShort": "{id_short}"}}],
  "submodels": [{{
    "id": "{id}:technical",
    "idShort": "TechnicalData",
    "submodelElements": [
      {{"modelType": "Property", "idShort": "MaxRotationSpeed", "valueType": "xs:int", "value": "{speed}"}}
    ]
  }}]
}}"#
    )
}

fn setup_test_env(backend: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let shelf = root.join("shelf");
    fs::create_dir_all(&shelf).unwrap();
    fs::write(
        shelf.join("motor.json"),
        environment("urn:example:aas:motor", "ExampleMotor", 5000),
    )
    .unwrap();
    fs::write(
        shelf.join("pump.json"),
        environment("urn:example:aas:pump", "CoolantPump", 1450),
    )
    .unwrap();
    fs::write(
        shelf.join("fan.json"),
        environment("urn:example:aas:fan", "ExhaustFan", 900),
    )
    .unwrap();

    let index = match backend {
        "sqlite" => format!(
            "path = \"{0}/data/index.json\"\nurl = \"sqlite://{0}/data/index.sqlite\"",
            root.display()
        ),
        _ => format!("path = \"{}/data/index.json\"", root.display()),
    };
    let config_content = format!(
        r#"[index]
{}

[scan]
max_workers = 2
page_size = 2
expiry_secs = 3600

[logging]
level = "warn"
"#,
        index
    );

    let config_path = config_dir.join("aasx-index.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = aasx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run aasx-index binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add_shelf(tmp: &TempDir, config_path: &Path) {
    let url = format!("file://{}", tmp.path().join("shelf").display());
    let (stdout, stderr, success) =
        run_cli(config_path, &["endpoint", "add", "shelf", &url, "--protocol", "directory"]);
    assert!(success, "endpoint add failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_index() {
    let (tmp, config_path) = setup_test_env("file");

    let (stdout, stderr, success) = run_cli(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(stdout.contains("0 endpoint(s)"));
    assert!(tmp.path().join("data/index.json").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("sqlite");

    let (_, _, success1) = run_cli(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cli(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_endpoint_add_and_list() {
    let (tmp, config_path) = setup_test_env("file");
    run_cli(&config_path, &["init"]);

    let (stdout, _, success) = run_cli(&config_path, &["endpoints"]);
    assert!(success);
    assert!(stdout.contains("No endpoints."));

    add_shelf(&tmp, &config_path);
    let (stdout, _, success) = run_cli(&config_path, &["endpoints"]);
    assert!(success);
    assert!(stdout.contains("shelf"));
    assert!(stdout.contains("directory"));

    let url = format!("file://{}", tmp.path().join("shelf").display());
    let (_, _, success) = run_cli(&config_path, &["endpoint", "add", "shelf", &url]);
    assert!(!success, "duplicate endpoint should fail");
}

#[test]
fn test_unreachable_endpoint_rejected() {
    let (tmp, config_path) = setup_test_env("file");
    let url = format!("file://{}", tmp.path().join("nowhere").display());

    let (_, stderr, success) = run_cli(&config_path, &["endpoint", "add", "gone", &url]);
    assert!(!success);
    assert!(stderr.contains("not reachable"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_protocol() {
    let (_tmp, config_path) = setup_test_env("file");

    let (_, stderr, success) = run_cli(
        &config_path,
        &["endpoint", "add", "ftp", "ftp://host", "--protocol", "ftp"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown protocol"), "stderr: {}", stderr);
}

#[test]
fn test_scan_and_list_on_both_backends() {
    for backend in ["file", "sqlite"] {
        let (tmp, config_path) = setup_test_env(backend);
        add_shelf(&tmp, &config_path);

        let (stdout, stderr, success) =
            run_cli(&config_path, &["scan", "shelf", "--progress", "off"]);
        assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
        assert!(
            stdout.contains("shelf: 3 added, 0 changed, 0 updated, 0 removed, 0 errors"),
            "{} backend: {}",
            backend,
            stdout
        );

        let (stdout, _, success) = run_cli(&config_path, &["list"]);
        assert!(success);
        assert!(stdout.contains("ExampleMotor"));
        assert!(stdout.contains("CoolantPump"));
        assert!(stdout.contains("ExhaustFan"));

        let (stdout, _, success) = run_cli(
            &config_path,
            &["list", "--filter", "#prop:MaxRotationSpeed > 1000"],
        );
        assert!(success);
        assert!(stdout.contains("ExampleMotor"));
        assert!(stdout.contains("CoolantPump"));
        assert!(!stdout.contains("ExhaustFan"), "{} backend: {}", backend, stdout);
    }
}

#[test]
fn test_scan_is_idempotent() {
    let (tmp, config_path) = setup_test_env("file");
    add_shelf(&tmp, &config_path);

    run_cli(&config_path, &["scan", "--progress", "off"]);
    let (stdout, _, success) = run_cli(&config_path, &["scan", "--progress", "off"]);
    assert!(success);
    assert!(
        stdout.contains("shelf: 0 added, 0 changed, 0 updated, 0 removed, 0 errors"),
        "Expected no work on a second scan, got: {}",
        stdout
    );

    fs::remove_file(tmp.path().join("shelf/pump.json")).unwrap();
    let (stdout, _, _) = run_cli(&config_path, &["scan", "--progress", "off"]);
    assert!(stdout.contains("1 removed"), "got: {}", stdout);
}

#[test]
fn test_scan_progress_json() {
    let (tmp, config_path) = setup_test_env("file");
    add_shelf(&tmp, &config_path);

    let (_, stderr, success) = run_cli(&config_path, &["scan", "shelf", "--progress", "json"]);
    assert!(success);
    let events: Vec<serde_json::Value> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    assert_eq!(events.iter().filter(|e| e["event"] == "added").count(), 3);
    let done = events.last().expect("progress events");
    assert_eq!(done["event"], "done");
    assert_eq!(done["statistics"]["added"], 3);
}

#[test]
fn test_list_pages_with_tokens() {
    let (tmp, config_path) = setup_test_env("file");
    add_shelf(&tmp, &config_path);
    run_cli(&config_path, &["scan", "--progress", "off"]);

    let (stdout, _, success) = run_cli(&config_path, &["list", "--limit", "2"]);
    assert!(success);
    assert!(!stdout.contains("previous:"));
    let next = stdout
        .lines()
        .find_map(|l| l.strip_prefix("next: "))
        .expect("first page links forward")
        .to_string();

    let (stdout, _, success) = run_cli(&config_path, &["list", "--limit", "2", "--after", &next]);
    assert!(success);
    assert!(stdout.contains("previous:"));
    assert!(!stdout.contains("next:"));
    assert_eq!(stdout.lines().filter(|l| l.starts_with("shelf")).count(), 1);

    let (_, stderr, success) = run_cli(&config_path, &["list", "--after", "%%%"]);
    assert!(!success);
    assert!(stderr.contains("invalid page token"));
}

#[test]
fn test_get_document() {
    let (tmp, config_path) = setup_test_env("file");
    add_shelf(&tmp, &config_path);
    run_cli(&config_path, &["scan", "--progress", "off"]);

    let (stdout, stderr, success) = run_cli(&config_path, &["get", "urn:example:aas:motor"]);
    assert!(success, "get failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains("ExampleMotor"));
    assert!(stdout.contains("motor.json"));
    assert!(stdout.contains("--- Content ---"));
    assert!(stdout.contains("MaxRotationSpeed"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env("file");
    run_cli(&config_path, &["init"]);

    let (_, stderr, success) = run_cli(&config_path, &["get", "urn:does-not-exist"]);
    assert!(!success);
    assert!(stderr.contains("Document not found"), "stderr: {}", stderr);
}

#[test]
fn test_check_and_remove_endpoint() {
    let (tmp, config_path) = setup_test_env("file");
    add_shelf(&tmp, &config_path);
    run_cli(&config_path, &["scan", "--progress", "off"]);

    let (stdout, _, success) = run_cli(&config_path, &["check", "shelf"]);
    assert!(success);
    assert!(stdout.contains("shelf: reachable"));

    let (stdout, _, success) = run_cli(&config_path, &["endpoint", "remove", "shelf"]);
    assert!(success);
    assert!(stdout.contains("Endpoint shelf removed."));

    let (stdout, _, _) = run_cli(&config_path, &["list"]);
    assert!(stdout.contains("No documents."));

    let (_, _, success) = run_cli(&config_path, &["check", "shelf"]);
    assert!(!success);
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn oforge_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("oforge");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/offers.sqlite"

[pricing]
validity_days = 7

[indexation]
workers = 1
partial_workers = 1
bulk_size = 50
partial_bulk_size = 50
pause_ms = 50

[[attributes.index]]
key = "DIAGONAL"
synonyms = ["SCREEN SIZE", "DIAGONALE"]
parser = "numeric"

[[verticals]]
id = "tv"
taxonomy_id = 404
excluding_tokens = ["accessories"]

[verticals.matching_categories]
all = ["Televisions"]
"#,
        root.display()
    );

    let config_path = config_dir.join("oforge.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_oforge(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = oforge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run oforge binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// One fragment line for a TV observation.
fn tv_fragment(datasource: &str, price: f64, timestamp: i64) -> String {
    format!(
        r#"{{"url":"https://{ds}.example/tv","datasource":"{ds}","category":"Televisions","attributes":[{{"name":"Screen size","value":"54 cm"}},{{"name":"Color","value":"black"}}],"price":{{"price":{price},"currency":"EUR","condition":"NEW"}},"resources":[{{"url":"//cdn.{ds}.example/tv.jpg","tags":["image"]}}],"referential":{{"GTIN":"4006381333931","BRAND":"Acme","MODEL":"TV-54X"}},"timestamp":{timestamp}}}"#,
        ds = datasource,
        price = price,
        timestamp = timestamp
    )
}

fn write_fragments(root: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_oforge(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_oforge(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_oforge(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_and_get() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    let fragments = write_fragments(tmp.path(), "f.ndjson", &[tv_fragment("shop1", 10.0, now)]);

    let (stdout, stderr, success) =
        run_oforge(&config_path, &["ingest", fragments.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Full merges:        1"));
    assert!(stdout.contains("Items indexed:      1"));

    let (stdout, stderr, success) = run_oforge(&config_path, &["get", "4006381333931"]);
    assert!(success, "get failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Product 4006381333931"));
    assert!(stdout.contains("Germany"));
    assert!(stdout.contains("ACME"));
    assert!(stdout.contains("TV-54X"));
    assert!(stdout.contains("tv"));
}

#[test]
fn test_bad_barcode_rejected() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    let bad = tv_fragment("shop1", 10.0, now).replace("4006381333931", "4006381333932");
    let fragments = write_fragments(tmp.path(), "f.ndjson", &[bad]);

    let (stdout, _, success) = run_oforge(&config_path, &["ingest", fragments.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("Rejected:           1"));
    assert!(stdout.contains("Items indexed:      0"));
}

#[test]
fn test_price_consolidation_across_runs() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);

    // shop1 at 10, then shop2 undercuts at 8.
    let first = write_fragments(
        tmp.path(),
        "first.ndjson",
        &[
            tv_fragment("shop1", 10.0, now),
            tv_fragment("shop2", 8.0, now),
        ],
    );
    let (_, _, success) = run_oforge(&config_path, &["ingest", first.to_str().unwrap()]);
    assert!(success);

    // shop1 raises to 12; its old offer is replaced, shop2 still wins.
    let second = write_fragments(
        tmp.path(),
        "second.ndjson",
        &[tv_fragment("shop1", 12.0, now)],
    );
    let (stdout, stderr, success) = run_oforge(&config_path, &["ingest", second.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    // Same attributes again, only the price moved: ships as a patch.
    assert!(stdout.contains("Partial merges:     1"), "stdout={}", stdout);

    let (stdout, _, success) = run_oforge(&config_path, &["export", "--sellable"]);
    assert!(success);
    let product: serde_json::Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(product["offers_count"], 2);
    assert_eq!(product["price"]["min_price"]["price"], 8.0);
    assert_eq!(product["price"]["min_price"]["datasource"], "shop2");
}

#[test]
fn test_export_filters_by_vertical() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    // One TV and one uncategorized book.
    let book = format!(
        r#"{{"url":"https://books.example/b","datasource":"books","price":{{"price":25.0,"currency":"EUR"}},"referential":{{"GTIN":"9780306406157"}},"timestamp":{}}}"#,
        now
    );
    let fragments = write_fragments(
        tmp.path(),
        "f.ndjson",
        &[tv_fragment("shop1", 10.0, now), book],
    );
    run_oforge(&config_path, &["ingest", fragments.to_str().unwrap()]);

    let (stdout, _, success) = run_oforge(&config_path, &["export", "--vertical", "tv"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 1);
    let product: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(product["id"], "4006381333931");
    assert_eq!(product["taxonomy_id"], 404);
}

#[test]
fn test_get_many_skips_unknown() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    let fragments = write_fragments(tmp.path(), "f.ndjson", &[tv_fragment("shop1", 10.0, now)]);
    run_oforge(&config_path, &["ingest", fragments.to_str().unwrap()]);

    let (stdout, _, success) = run_oforge(
        &config_path,
        &["get-many", "4006381333931", "0000000000000"],
    );
    assert!(success);
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 1);
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    let fragments = write_fragments(tmp.path(), "f.ndjson", &[tv_fragment("shop1", 10.0, now)]);
    let (stdout, _, success) = run_oforge(
        &config_path,
        &["ingest", fragments.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("dry run"));

    let (_, _, get_success) = run_oforge(&config_path, &["get", "4006381333931"]);
    assert!(!get_success, "dry run must not persist products");
}

#[test]
fn test_stats_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    let fragments = write_fragments(tmp.path(), "f.ndjson", &[tv_fragment("shop1", 10.0, now)]);
    run_oforge(&config_path, &["ingest", fragments.to_str().unwrap()]);

    let (stdout, stderr, success) = run_oforge(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Products:    1"));
    assert!(stdout.contains("tv"));
}

#[test]
fn test_resource_urls_normalized() {
    let (tmp, config_path) = setup_test_env();
    let now = chrono::Utc::now().timestamp();

    run_oforge(&config_path, &["init"]);
    let fragments = write_fragments(tmp.path(), "f.ndjson", &[tv_fragment("shop1", 10.0, now)]);
    run_oforge(&config_path, &["ingest", fragments.to_str().unwrap()]);

    let (stdout, _, success) = run_oforge(&config_path, &["export"]);
    assert!(success);
    let product: serde_json::Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    // The protocol-relative URL from the fragment got the https scheme.
    assert!(product["resources"]
        .as_object()
        .unwrap()
        .contains_key("https://cdn.shop1.example/tv.jpg"));
}

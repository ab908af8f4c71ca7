#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use tempfile::TempDir;

fn write_triples(dir: &Path) -> PathBuf {
    let path = dir.join("triples.json");
    let triples = json!([
        {"subject_id": "geoId/06", "predicate": "name", "object_value": "California"},
        {
            "subject_id": "geoId/0644000",
            "subject_types": ["City"],
            "predicate": "containedInPlace",
            "object_id": "geoId/06",
            "object_types": ["State"]
        },
        {
            "subject_id": "geoId/0667000",
            "subject_types": ["City"],
            "predicate": "containedInPlace",
            "object_id": "geoId/06",
            "object_types": ["State"]
        }
    ]);
    fs::write(&path, triples.to_string()).expect("write triples");
    path
}

fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let input = write_triples(dir.path());
    let cache = dir.path().join("frequent_2024.json");
    let output = cargo_bin_cmd!("mixer")
        .args(["build-cache", "--page-size", "1", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&cache)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf8");
    assert!(stdout.starts_with("wrote "), "{stdout}");

    let config = dir.path().join("mixer.toml");
    fs::write(
        &config,
        "[[import_groups]]\nname = \"frequent_2024\"\npath = \"frequent_2024.json\"\n",
    )
    .expect("write config");
    (dir, config)
}

fn fetch_json(config: &Path, args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("mixer")
        .arg("fetch")
        .arg("--config")
        .arg(config)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn fetch_reads_a_built_cache() {
    let (_dir, config) = setup();
    let body = fetch_json(&config, &["--node", "geoId/06", "--property", "name"]);
    assert_eq!(body["data"][0]["node"], "geoId/06");
    assert_eq!(body["data"][0]["values"], json!([{"value": "California"}]));
    assert!(body["next_token"].is_null());
}

#[test]
fn fetch_pages_with_tokens() {
    let (_dir, config) = setup();
    let args = [
        "--node",
        "geoId/06",
        "--property",
        "containedInPlace",
        "--direction",
        "in",
        "--limit",
        "1",
    ];
    let first = fetch_json(&config, &args);
    assert_eq!(first["data"][0]["type"], "City");
    assert_eq!(first["data"][0]["values"][0]["dcid"], "geoId/0644000");
    let token = first["next_token"].as_str().expect("token").to_owned();

    let mut next_args = args.to_vec();
    next_args.extend(["--token", token.as_str()]);
    let second = fetch_json(&config, &next_args);
    assert_eq!(second["data"][0]["values"][0]["dcid"], "geoId/0667000");
    assert!(second["next_token"].is_null());
}

#[test]
fn bad_token_exits_with_error() {
    let (_dir, config) = setup();
    let output = cargo_bin_cmd!("mixer")
        .arg("fetch")
        .arg("--config")
        .arg(&config)
        .args(["--node", "geoId/06", "--property", "name", "--token", "%%%"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("invalid pagination token"), "{stderr}");
}

#[test]
fn unknown_direction_is_rejected_by_the_parser() {
    cargo_bin_cmd!("mixer")
        .env_remove("MIXER_CONFIG")
        .args(["fetch", "--node", "n", "--property", "p", "--direction", "up"])
        .assert()
        .failure();
}

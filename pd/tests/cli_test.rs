//! CLI tests for the `pd` binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `pd` command isolated from the user's config and log directories
fn pd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pd").expect("binary should build");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"));
    cmd
}

fn write_config(home: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = home.path().join("pd.yml");
    fs::write(&path, yaml).expect("Failed to write config");
    path
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    pd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("kinds"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_kinds_lists_all_job_kinds() {
    let home = TempDir::new().unwrap();
    pd(&home)
        .arg("kinds")
        .assert()
        .success()
        .stdout(predicate::str::contains("content_generation"))
        .stdout(predicate::str::contains("reply_check"))
        .stdout(predicate::str::contains("metrics_collection"));
}

#[test]
fn test_config_prints_effective_yaml() {
    let home = TempDir::new().unwrap();
    let path = write_config(&home, "scheduler:\n  reply-check-interval-secs: 123\n");

    pd(&home)
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("reply-check-interval-secs: 123"))
        .stdout(predicate::str::contains("max-concurrent-tasks: 5"));
}

#[test]
fn test_project_local_config_is_picked_up() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join(".postdaemon.yml"),
        "scheduler:\n  metrics-collection-interval-secs: 321\n",
    )
    .unwrap();

    pd(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("metrics-collection-interval-secs: 321"));
}

#[test]
fn test_invalid_config_fails() {
    let home = TempDir::new().unwrap();
    let path = write_config(&home, "scheduler:\n  queue:\n    max-concurrent-tasks: 0\n");

    pd(&home)
        .arg("-c")
        .arg(&path)
        .arg("kinds")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max-concurrent-tasks"));
}

#[test]
fn test_missing_config_file_fails() {
    let home = TempDir::new().unwrap();
    pd(&home)
        .args(["-c", "does-not-exist.yml", "kinds"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_run_once_json_summary() {
    let home = TempDir::new().unwrap();
    let path = write_config(
        &home,
        "scheduler:\n  platforms:\n    bluesky:\n      enabled: false\ndry-run:\n  delay-ms: 0\n",
    );

    let output = pd(&home)
        .arg("-c")
        .arg(&path)
        .args(["run", "--once", "--format", "json"])
        .output()
        .expect("Failed to run pd");
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let cycles = summary["cycles"].as_array().expect("cycles array");
    assert_eq!(cycles.len(), 3);
    for cycle in cycles {
        let outcomes = cycle["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0][0], "twitter");
        assert_eq!(outcomes[0][1]["outcome"], "completed");
    }
    assert_eq!(summary["shutdown"]["abandoned"], 0);

    let loops = summary["loops"].as_array().expect("loops array");
    assert_eq!(loops.len(), 3);
    assert!(loops.iter().all(|l| l["running"] == false));

    // One twitter bucket per operation class the jobs use
    let buckets = summary["rate_limits"].as_array().expect("rate_limits array");
    assert_eq!(buckets.len(), 2);
    assert!(buckets.iter().all(|b| b["platform"] == "twitter" && b["used"].as_u64().unwrap() >= 1));
}

#[test]
fn test_run_once_text_summary() {
    let home = TempDir::new().unwrap();
    let path = write_config(&home, "dry-run:\n  delay-ms: 0\n");

    pd(&home)
        .arg("-c")
        .arg(&path)
        .args(["run", "--once"])
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("reply_check"))
        .stdout(predicate::str::contains("twitter"))
        .stdout(predicate::str::contains("Rate limits"))
        .stdout(predicate::str::contains("Shutdown:"));
}

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn create_test_files(dir: &TempDir, files: &[(&str, &str)]) -> Result<()> {
    for (name, content) in files {
        let file_path = dir.path().join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(file_path, content)?;
    }
    Ok(())
}

fn write_config(dir: &TempDir, extra: &str) -> Result<std::path::PathBuf> {
    let path = dir.path().join("refscout.yaml");
    fs::write(
        &path,
        format!(
            "scan_parameters:\n  scan_directories: [\".\"]\n  target_file_extensions: [\"py\"]\n\
             reference_finding:\n  patterns: [\"{{filename}}\", \"{{module_name}}\"]\n{}",
            extra
        ),
    )?;
    Ok(path)
}

/// Runs the binary inside `dir`, isolated from any user configuration
fn refscout(dir: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("refscout")?;
    cmd.current_dir(dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

fn sample_project() -> Result<TempDir> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[
            ("pkg/models.py", "class User:\n    pass\n"),
            ("pkg/views.py", "from pkg.models import User\n"),
            ("app.py", "import pkg.views\n"),
        ],
    )?;
    Ok(dir)
}

#[test]
fn test_index_prints_references() -> Result<()> {
    let dir = sample_project()?;
    let config = write_config(&dir, "")?;

    refscout(dir.path())?
        .args(["index", "-c", config.to_str().unwrap(), "-d", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("pkg/models.py"))
        .stdout(predicate::str::contains("from pkg.models import User"))
        .stdout(predicate::str::contains(
            "Found 2 references to 2 of 3 target files",
        ));
    Ok(())
}

#[test]
fn test_stats_only_hides_references() -> Result<()> {
    let dir = sample_project()?;
    let config = write_config(&dir, "")?;

    refscout(dir.path())?
        .args(["index", "--stats", "-c", config.to_str().unwrap(), "-d", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("from pkg.models import User").not())
        .stdout(predicate::str::contains("Found 2 references"));
    Ok(())
}

#[test]
fn test_local_config_is_picked_up() -> Result<()> {
    let dir = sample_project()?;
    fs::write(
        dir.path().join(".refscout.yaml"),
        "scan_parameters:\n  scan_directories: [pkg]\nreference_finding:\n  patterns: [\"{module_name}\"]\n",
    )?;

    refscout(dir.path())?
        .args(["index", "--stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("of 2 target files"));
    Ok(())
}

#[test]
fn test_missing_config_file_fails() -> Result<()> {
    let dir = tempdir()?;

    refscout(dir.path())?
        .args(["index", "-c", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
    Ok(())
}

#[test]
fn test_missing_patterns_fail_validation() -> Result<()> {
    let dir = sample_project()?;
    let config = dir.path().join("empty.yaml");
    fs::write(&config, "scan_parameters:\n  scan_directories: [\".\"]\n")?;

    refscout(dir.path())?
        .args(["index", "-c", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reference_finding.patterns"));
    Ok(())
}

#[test]
fn test_json_output() -> Result<()> {
    let dir = sample_project()?;
    let config = write_config(&dir, "")?;
    let out = dir.path().join("out.json");

    refscout(dir.path())?
        .args([
            "index",
            "--stats",
            "-c",
            config.to_str().unwrap(),
            "--json",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out)?)?;
    assert_eq!(json["results"]["total_references"], 2);
    assert_eq!(json["targets_total"], 3);
    assert!(json["summary"]["phases"].is_array());
    Ok(())
}

#[test]
fn test_quick_test_flag() -> Result<()> {
    let dir = tempdir()?;
    let files: Vec<(String, String)> = (0..8)
        .map(|i| (format!("m{}.py", i), format!("x = {}\n", i)))
        .collect();
    let borrowed: Vec<(&str, &str)> = files
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_str()))
        .collect();
    create_test_files(&dir, &borrowed)?;
    let config = write_config(&dir, "")?;

    refscout(dir.path())?
        .args(["index", "--quick-test", "--stats", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("of 3 target files"));
    Ok(())
}

#[test]
fn test_checkpoint_flags() -> Result<()> {
    let dir = sample_project()?;
    let config = write_config(&dir, "")?;

    refscout(dir.path())?
        .args(["index", "--create-checkpoint", "--stats", "-c", config.to_str().unwrap()])
        .assert()
        .success();
    assert!(dir
        .path()
        .join("reports/cross_reference/checkpoint.json")
        .exists());

    // Everything is already processed, so the resumed run searches nothing
    refscout(dir.path())?
        .args([
            "index",
            "--continue-from-checkpoint",
            "--stats",
            "-c",
            config.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resumed from checkpoint"))
        .stdout(predicate::str::contains("of 0 target files"));
    Ok(())
}

#[test]
fn test_verbose_logging_goes_to_stderr() -> Result<()> {
    let dir = sample_project()?;
    let config = write_config(&dir, "logging:\n  level: error\n")?;

    refscout(dir.path())?
        .args(["index", "-v", "--stats", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("Worker pool started"));
    Ok(())
}

#[test]
fn test_show_config() -> Result<()> {
    let dir = sample_project()?;
    let config = write_config(&dir, "performance:\n  partial_run_percentage: 250\n")?;

    let output = refscout(dir.path())?
        .args(["show-config", "-c", config.to_str().unwrap()])
        .output()?;
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["performance"]["partial_run_percentage"], 100.0);
    assert_eq!(json["reference_finding"]["search_method"], "native");
    Ok(())
}

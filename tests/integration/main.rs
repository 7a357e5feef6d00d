//! Integration tests for Hangar

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn hangar() -> Command {
        cargo_bin_cmd!("hangar")
    }

    /// Config rooted in `dir` with a single global worker
    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("config.toml");
        let content = format!(
            r#"
[ledger]
snapshot_path = "{}"

[store]
content_root = "{}"

[[workers]]
name = "w1"
tags = ["tagged"]
"#,
            dir.join("ledger.json").display(),
            dir.join("volumes").display()
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        hangar()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("worker volumes, resource caches"));
    }

    #[test]
    fn version_displays() {
        hangar()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("hangar"));
    }

    #[test]
    fn config_path_honors_flag() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        hangar()
            .arg("--config")
            .arg(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        hangar()
            .env("HANGAR_CONFIG", temp.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]").and(predicate::str::contains("[gc]")));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        hangar()
            .env("HANGAR_CONFIG", &path)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(path.exists());
    }

    #[test]
    fn invalid_config_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[gc]\ninterval_secs = \"soon\"\n").unwrap();
        hangar()
            .env("HANGAR_CONFIG", &path)
            .args(["status"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("hangar config show"));
    }

    #[test]
    fn sweep_on_empty_ledger() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        hangar()
            .env("HANGAR_CONFIG", &config)
            .args(["sweep", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"volumes_destroyed\": 0"));
        assert!(temp.path().join("ledger.json").exists());
    }

    #[test]
    fn status_lists_registered_workers() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        // sweep registers configured workers and writes the snapshot
        hangar()
            .env("HANGAR_CONFIG", &config)
            .args(["sweep", "--format", "plain"])
            .assert()
            .success();

        hangar()
            .env("HANGAR_CONFIG", &config)
            .args(["status", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("w1"));

        hangar()
            .env("HANGAR_CONFIG", &config)
            .args(["status", "--format", "json", "--volumes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"workers\": 1").and(predicate::str::contains("\"volumes\": []")));
    }
}

//! Integration tests for leafcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use leafcache::config::Config;
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn leafcache() -> Command {
        cargo_bin_cmd!("leafcache")
    }

    /// Config rooted in `dir`, with shell stand-ins for the models and an
    /// unreachable remote that fails fast
    fn write_config(dir: &Path) -> PathBuf {
        let mut config = Config::default();
        config.cache.root = dir.join("cache");
        config.upload.remote_url = "http://127.0.0.1:9".to_string();
        config.upload.max_attempts = 1;
        config.upload.backoff_secs = 0;
        config.upload.timeout_secs = 2;
        config.models.original_area_cmd = vec!["sh".into(), "-c".into(), "echo 40".into()];
        config.models.simulated_area_cmd = vec!["sh".into(), "-c".into(), "echo 30".into()];

        let path = dir.join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        path
    }

    fn with_config(path: &Path) -> Command {
        let mut cmd = leafcache();
        cmd.arg("--config").arg(path);
        cmd
    }

    #[test]
    fn help_displays() {
        leafcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("LeafScan"));
    }

    #[test]
    fn version_displays() {
        leafcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("leafcache"));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        with_config(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        with_config(&temp.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]").and(predicate::str::contains("[upload]")));
    }

    #[test]
    fn config_init_writes_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        with_config(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(path.exists());

        with_config(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[cache]\nmax_bytes = \"lots\"\n").unwrap();

        with_config(&path)
            .arg("gc")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn status_unknown_job() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        with_config(&config)
            .args(["status", "nobody"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No job recorded"));
    }

    #[test]
    fn invalid_entry_id_rejected() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        with_config(&config)
            .args(["status", "../etc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid entry id"));
    }

    #[test]
    fn gc_on_empty_cache() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        with_config(&config)
            .arg("gc")
            .assert()
            .success()
            .stdout(predicate::str::contains("nothing evicted"));
    }

    #[test]
    fn fetch_without_inputs_waits() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        with_config(&config)
            .args(["fetch", "job-empty"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Waiting on"));
    }

    #[cfg(unix)]
    #[test]
    fn run_then_fetch_across_invocations() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let video = temp.path().join("scan.mp4");
        std::fs::write(&video, b"not really a video").unwrap();

        with_config(&config)
            .args(["run", "job-1", "--leaf-number", "3", "--leaf-widths", "1,2"])
            .args(["--length", "10", "--video"])
            .arg(&video)
            .assert()
            .success()
            .stdout(predicate::str::contains("original_area (40.00)"))
            .stdout(predicate::str::contains("defoliation (25.00)"));

        with_config(&config)
            .args(["fetch", "job-1", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"completed\""))
            .stdout(predicate::str::contains("25.0"));

        with_config(&config)
            .args(["status", "job-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("expires"));
    }

    #[cfg(unix)]
    #[test]
    fn reset_keeps_inputs() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        with_config(&config)
            .args(["run", "job-2", "--leaf-number", "2", "--leaf-widths", "3"])
            .assert()
            .success();

        with_config(&config)
            .args(["reset", "job-2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Job reset"));

        with_config(&config)
            .args(["status", "job-2", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"in_leaf_number\": true"))
            .stdout(predicate::str::contains("\"out_original\": false"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_remote_clear_keeps_local_wipe() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        with_config(&config)
            .args(["run", "job-3", "--leaf-number", "2", "--leaf-widths", "3"])
            .assert()
            .success();

        // Local cache is wiped before the unreachable remote fails the command
        with_config(&config)
            .args(["clear", "--remote"])
            .assert()
            .failure();

        with_config(&config)
            .args(["status", "job-3"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No job recorded"));
    }
}

//! Integration tests for reposerve

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    /// Binary with an isolated config path
    fn reposerve(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("reposerve");
        cmd.env("REPOSERVE_CONFIG", config_dir.path().join("config.toml"));
        cmd
    }

    fn repo_with_app() -> TempDir {
        let repo = TempDir::new().unwrap();
        let app = repo.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(
            app.join("cm.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  mode: prod\n",
        )
        .unwrap();
        fs::write(app.join("notes.yaml"), "just: some values\n").unwrap();
        repo
    }

    #[test]
    fn help_displays() {
        let config = TempDir::new().unwrap();
        reposerve(&config)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("manifest generation"));
    }

    #[test]
    fn version_displays() {
        let config = TempDir::new().unwrap();
        reposerve(&config)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("reposerve"));
    }

    #[test]
    fn config_path_honors_env() {
        let config = TempDir::new().unwrap();
        reposerve(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let config = TempDir::new().unwrap();
        reposerve(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[generation]"))
            .stdout(predicate::str::contains("pause_after_failures = 3"));
    }

    #[test]
    fn config_set_then_show() {
        let config = TempDir::new().unwrap();
        reposerve(&config)
            .args(["config", "set", "generation.pause_for_requests", "4"])
            .assert()
            .success();
        reposerve(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("pause_for_requests = 4"));
    }

    #[test]
    fn detect_directory_and_helm() {
        let config = TempDir::new().unwrap();
        let repo = repo_with_app();
        fs::create_dir_all(repo.path().join("chart")).unwrap();
        fs::write(repo.path().join("chart/Chart.yaml"), "name: demo\n").unwrap();

        reposerve(&config)
            .args(["detect", "--path", "app", "--root"])
            .arg(repo.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Directory"));

        reposerve(&config)
            .args(["detect", "--path", "chart", "--root"])
            .arg(repo.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Helm"));
    }

    #[test]
    fn render_plain_directory() {
        let config = TempDir::new().unwrap();
        let repo = repo_with_app();

        reposerve(&config)
            .args(["render", "--path", "app", "--format", "json", "--root"])
            .arg(repo.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("ConfigMap"))
            .stdout(predicate::str::contains("app/cm.yaml"))
            .stdout(predicate::str::contains("just").not());
    }

    #[test]
    fn render_rejects_escaping_app_path() {
        let config = TempDir::new().unwrap();
        let repo = repo_with_app();

        reposerve(&config)
            .args(["render", "--path", "../../etc", "--root"])
            .arg(repo.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("resolved to outside repository root"));
    }

    #[cfg(unix)]
    #[test]
    fn render_rejects_symlink_out_of_repo() {
        let config = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(
            outside.path().join("secret.yaml"),
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n",
        )
        .unwrap();
        let repo = repo_with_app();
        std::os::unix::fs::symlink(
            outside.path().join("secret.yaml"),
            repo.path().join("app/secret.yaml"),
        )
        .unwrap();

        reposerve(&config)
            .args(["render", "--path", "app", "--root"])
            .arg(repo.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("illegal filepath"))
            .stderr(predicate::str::contains("Secret").not());
    }

    #[test]
    fn render_missing_value_file_fails() {
        let config = TempDir::new().unwrap();
        let repo = repo_with_app();

        reposerve(&config)
            .args([
                "render",
                "--path",
                "app",
                "--values",
                "missing.yaml",
                "--root",
            ])
            .arg(repo.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("no such file or directory"));
    }
}

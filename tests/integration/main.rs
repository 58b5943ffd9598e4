//! Integration tests for rmk

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn rmk() -> Command {
        cargo_bin_cmd!("rmk")
    }

    #[test]
    fn help_displays() {
        rmk()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build orchestrator"));
    }

    #[test]
    fn version_displays() {
        rmk()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("rmk"));
    }

    #[test]
    fn config_path_honours_flag() {
        rmk()
            .args(["--config", "/tmp/rmk-test/custom.toml", "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let dir = tempfile::tempdir().unwrap();
        rmk()
            .arg("--config")
            .arg(dir.path().join("none.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]").and(predicate::str::contains("mtime")));
    }

    #[test]
    fn config_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        rmk()
            .arg("--config")
            .arg(&config)
            .args(["config", "set", "build.concurrency", "3"])
            .assert()
            .success();

        rmk()
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("concurrency = 3"));
    }

    #[test]
    fn unknown_policy_rejected() {
        rmk()
            .args(["build", "--policy", "sometimes"])
            .assert()
            .failure();
    }
}

mod build_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use filetime::FileTime;
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const PLAN: &str = r#"
[jobs.copy]
inputs = ["in.txt"]
command = "cp {inputs} {out}"
output = "out.txt"

[jobs.broken]
command = "exit 3"

[tasks]
all = ["copy"]
"#;

    fn project() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("build.toml"), PLAN).unwrap();
        fs::write(dir.path().join("in.txt"), "hello\n").unwrap();
        dir
    }

    fn rmk(dir: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("rmk");
        cmd.arg("--config")
            .arg(dir.join("none.toml"))
            .arg("build")
            .arg("-C")
            .arg(dir);
        cmd
    }

    #[test]
    fn builds_default_task() {
        let dir = project();
        rmk(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Build OK"));

        let out = fs::read_to_string(dir.path().join(".rmk/out.txt")).unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn readonly_accepts_fresh_results() {
        let dir = project();
        rmk(dir.path()).assert().success();

        rmk(dir.path())
            .args(["--policy", "readonly"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Build OK"));
    }

    #[test]
    fn readonly_rejects_changed_input() {
        let dir = project();
        rmk(dir.path()).assert().success();

        let future = FileTime::from_unix_time(FileTime::now().unix_seconds() + 60, 0);
        filetime::set_file_mtime(dir.path().join("in.txt"), future).unwrap();

        rmk(dir.path())
            .args(["--policy", "readonly"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Rebuilding copy"));
    }

    #[test]
    fn failing_command_reports_directory() {
        let dir = project();
        rmk(dir.path())
            .arg("broken")
            .assert()
            .failure()
            .stdout(predicate::str::contains("Build Failed in"));
    }

    #[test]
    fn unknown_task_fails() {
        let dir = project();
        rmk(dir.path())
            .arg("nothing")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown task 'nothing'"));
    }

    #[test]
    fn missing_build_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        rmk(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Build file not found"));
    }
}

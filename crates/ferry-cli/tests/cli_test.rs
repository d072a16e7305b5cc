use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn ferry() -> assert_cmd::Command {
    cargo_bin_cmd!("ferry")
}

fn project(toml: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("ferry.toml"), toml).unwrap();
    tmp
}

// ── Help / Version ──

#[test]
fn shows_help() {
    ferry()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build and push function images"));
}

#[test]
fn shows_version() {
    ferry()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ferry"));
}

#[test]
fn build_help_lists_overrides() {
    ferry()
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--pool-size"))
        .stdout(predicate::str::contains("--build-arg"))
        .stdout(predicate::str::contains("--push"));
}

// ── Function selection ──

#[test]
fn build_without_functions_reports_none_found() {
    let tmp = TempDir::new().unwrap();

    ferry()
        .current_dir(tmp.path())
        .arg("build")
        .assert()
        .success()
        .stderr(predicate::str::contains("No functions found"));
}

#[test]
fn fetch_without_functions_reports_none_found() {
    let tmp = project("[build]\npool_size = 2\n");

    ferry()
        .args(["fetch", "-d"])
        .arg(tmp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("No functions found"));
}

#[test]
fn unknown_function_is_rejected() {
    let tmp = project("[functions.hello]\ntemplate = \"golang\"\n");

    ferry()
        .current_dir(tmp.path())
        .args(["build", "goodbye"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown function 'goodbye'"))
        .stderr(predicate::str::contains("hello"));
}

// ── Validation ──

#[test]
fn malformed_build_arg_is_rejected() {
    let tmp = project("[functions.hello]\ntemplate = \"golang\"\n");

    ferry()
        .current_dir(tmp.path())
        .args(["build", "--build-arg", "NOVALUE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs key=value"));
}

#[test]
fn invalid_config_is_reported() {
    let tmp = project("[build\npool_size = ");

    ferry()
        .current_dir(tmp.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config"));
}

#[test]
fn missing_function_sources_fail_before_fetching() {
    let tmp = project("[functions.hello]\ntemplate = \"golang\"\n");

    ferry()
        .current_dir(tmp.path())
        .arg("fetch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("function 'hello' cannot be built"));

    assert!(!tmp.path().join(".ferry").exists());
}

// ── Doctor ──

#[test]
fn doctor_reports_missing_config() {
    let tmp = TempDir::new().unwrap();

    ferry()
        .current_dir(tmp.path())
        .arg("doctor")
        .assert()
        .failure()
        .stdout(predicate::str::contains("ferry.toml"))
        .stdout(predicate::str::contains("Not found"));
}

#[test]
fn doctor_lists_templates() {
    let tmp = project(
        "[functions.a]\ntemplate = \"golang\"\n\n[functions.b]\ntemplate = \"golang\"\n",
    );

    ferry()
        .current_dir(tmp.path())
        .arg("doctor")
        .assert()
        .stdout(predicate::str::contains("2 defined"))
        .stdout(predicate::str::contains("golang"))
        .stdout(predicate::str::contains("not fetched"));
}

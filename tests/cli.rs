use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn oleander() -> Command {
    Command::cargo_bin("oleander").expect("binary exists")
}

#[test]
fn run_executes_a_script_file() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("greet.ol");
    fs::write(
        &script,
        "fn greet(name) => `hello {{name}}`\nprintln(greet(\"world\"));\n",
    )
    .expect("write script");

    oleander()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn run_reuses_a_cache_directory() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("cached.ol");
    let cache_dir = dir.path().join("cache");
    fs::write(&script, "println(2 + 2);\n").expect("write script");

    oleander()
        .arg("run")
        .arg(&script)
        .arg("--cache-dir")
        .arg(&cache_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("4"));

    let entries: Vec<_> = fs::read_dir(&cache_dir)
        .expect("cache dir should exist")
        .collect();
    assert_eq!(entries.len(), 1, "one cache entry expected");

    // Second run hits the cache and behaves identically.
    oleander()
        .arg("run")
        .arg(&script)
        .arg("--cache-dir")
        .arg(&cache_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("4"));
}

#[test]
fn eval_prints_the_result_value() {
    oleander()
        .arg("eval")
        .arg("1 + 2")
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn eval_reports_diagnostics_on_stderr() {
    oleander()
        .arg("eval")
        .arg("1 / 0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("division by zero"));
}

#[test]
fn parse_prints_the_canonical_rendering() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("messy.ol");
    fs::write(&script, "let   x=1+2;").expect("write script");

    oleander()
        .arg("parse")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("let x = 1 + 2;"));
}

#[test]
fn run_reports_syntax_errors_with_location() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("broken.ol");
    fs::write(&script, "let x = ;\n").expect("write script");

    oleander()
        .arg("run")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[syntax]"))
        .stderr(predicate::str::contains("broken.ol"));
}

#[test]
fn tokenize_lists_the_token_stream() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("tokens.ol");
    fs::write(&script, "let x = 5;").expect("write script");

    oleander()
        .arg("tokenize")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("Identifier x"));
}

#[test]
fn missing_script_files_fail_cleanly() {
    oleander()
        .arg("run")
        .arg("does-not-exist.ol")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn dex_mir() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dex-mir"))
}

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

#[test]
fn test_compile_summarizes_every_method() {
    dex_mir()
        .arg("compile")
        .arg(data("methods.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("compiled  int T.pick(int)"))
        .stdout(predicate::str::contains("rejected  void T.broken()"))
        .stdout(predicate::str::contains(
            "3 methods: 2 compiled, 0 skipped, 1 rejected",
        ));
}

#[test]
fn test_filter_flag_overrides_default() {
    dex_mir()
        .args(["compile", "--filter", "interpret-only", "-j", "2"])
        .arg(data("methods.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "3 methods: 0 compiled, 2 skipped, 1 rejected",
        ));
}

#[test]
fn test_config_file_sets_filter() {
    dex_mir()
        .arg("compile")
        .arg(data("loop.json"))
        .arg("--config")
        .arg(data("options.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "1 methods: 0 compiled, 1 skipped, 0 rejected",
        ));
}

#[test]
fn test_json_output_reports_checks() {
    let output = dex_mir()
        .args(["compile", "--json", "--verify"])
        .arg(data("methods.json"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let outcomes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let outcomes = outcomes.as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0]["status"], "compiled");
    assert_eq!(outcomes[1]["method"], "int T.first(int[])");
    assert_eq!(outcomes[1]["checks"]["range_checks"], 1);
    assert_eq!(outcomes[2]["status"], "rejected");
}

#[test]
fn test_dump_dir_receives_one_file_per_compiled_method() {
    let dir = TempDir::new().unwrap();
    let dumps = dir.path().join("dumps");
    dex_mir()
        .arg("compile")
        .arg(data("methods.json"))
        .arg("--dump-dir")
        .arg(&dumps)
        .args(["--suffix", "_final"])
        .assert()
        .success();

    let files: Vec<String> = std::fs::read_dir(&dumps)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 2);
    assert!(files
        .iter()
        .all(|name| name.ends_with("_final.dot")));
}

#[test]
fn test_cfg_prints_blocks_and_writes_dot() {
    let dir = TempDir::new().unwrap();
    let dot = dir.path().join("sum.dot");
    dex_mir()
        .arg("cfg")
        .arg(data("loop.json"))
        .arg("--dot")
        .arg(&dot)
        .assert()
        .success()
        .stdout(predicate::str::contains("int T.sum(int)"))
        .stdout(predicate::str::contains("@0x0002"))
        .stdout(predicate::str::contains("(Taken)"));

    let text = std::fs::read_to_string(&dot).unwrap();
    assert!(text.starts_with("digraph G {"));
}

#[test]
fn test_cfg_fails_on_broken_method() {
    dex_mir()
        .arg("cfg")
        .arg(data("methods.json"))
        .assert()
        .failure();
}

#[test]
fn test_missing_input_fails() {
    dex_mir()
        .arg("compile")
        .arg(data("no_such_file.json"))
        .assert()
        .failure();
}

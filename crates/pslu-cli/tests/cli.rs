use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn pslu() -> Command {
    Command::cargo_bin("pslu").unwrap()
}

fn generate_grid(dir: &Path, k: usize) -> std::path::PathBuf {
    let path = dir.join(format!("grid{k}.mtx"));
    pslu()
        .args(["generate", "--grid", &k.to_string(), "--out", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));
    path
}

#[test]
fn pslu_generate_writes_matrix_market() {
    let dir = tempdir().unwrap();
    let path = generate_grid(dir.path(), 5);
    let text = fs::read_to_string(path).unwrap();
    assert!(text.starts_with("%%MatrixMarket matrix coordinate real general"));
    assert!(text.contains("25 25 105"));
}

#[test]
fn pslu_factor_prints_summary_and_check() {
    let dir = tempdir().unwrap();
    let path = generate_grid(dir.path(), 8);
    pslu()
        .args(["factor", path.to_str().unwrap(), "--threads", "2", "--check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nnz(L)"))
        .stdout(predicate::str::contains("residual:"));
}

#[test]
fn pslu_factor_json_report() {
    let dir = tempdir().unwrap();
    let path = generate_grid(dir.path(), 6);
    let output = pslu()
        .args(["factor", path.to_str().unwrap(), "--threads", "3", "--json", "--check"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["report"]["n"], 36);
    assert_eq!(value["report"]["threads"], 3);
    assert!(value["residual"].as_f64().unwrap() < 1e-10);
}

#[test]
fn pslu_factor_with_partial_config() {
    let dir = tempdir().unwrap();
    let path = generate_grid(dir.path(), 6);
    let config = dir.path().join("opts.toml");
    fs::write(&config, "panel_size = 2\nmax_supernode = 3\n").unwrap();
    pslu()
        .args([
            "factor",
            path.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_supernode_width\""));
}

#[test]
fn pslu_invalid_config_exits_with_input_error() {
    let dir = tempdir().unwrap();
    let path = generate_grid(dir.path(), 4);
    let config = dir.path().join("bad.toml");
    fs::write(&config, "panel_size = 0\n").unwrap();
    pslu()
        .args(["factor", path.to_str().unwrap(), "--config", config.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("panel_size"));
}

#[test]
fn pslu_singular_matrix_exits_with_numeric_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("singular.mtx");
    fs::write(
        &path,
        "%%MatrixMarket matrix coordinate real general\n2 2 4\n1 1 1.0\n2 1 1.0\n1 2 1.0\n2 2 1.0\n",
    )
    .unwrap();
    pslu()
        .args(["factor", path.to_str().unwrap(), "--threads", "2"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Singular pivot"))
        .stderr(predicate::str::contains("info = 2"));
}

#[test]
fn pslu_missing_matrix_exits_with_input_error() {
    pslu()
        .args(["factor", "/nonexistent/input.mtx"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("/nonexistent/input.mtx"));
}

#[test]
fn pslu_options_prints_defaults() {
    pslu()
        .arg("options")
        .assert()
        .success()
        .stdout(predicate::str::contains("panel_size = 8"))
        .stdout(predicate::str::contains("mode = \"fresh\""));
}

// ABOUTME: CLI surface tests for the datalake-sync binary
// ABOUTME: Checks argument handling without touching the network

use std::process::Command;

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_datalake-sync"))
}

#[test]
fn test_missing_environment_exits_with_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = binary()
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run binary");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No environment specified"), "{}", stderr);
}

#[test]
fn test_help_lists_options() {
    let output = binary().arg("--help").output().expect("failed to run binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--control-db"));
    assert!(stdout.contains("--watermark-policy"));
    assert!(stdout.contains("--default-page-size"));
}

#[test]
fn test_unknown_environment_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = binary()
        .arg("NOT_CONFIGURED")
        .arg("--control-db")
        .arg(dir.path().join("control.db"))
        .output()
        .expect("failed to run binary");

    assert!(!output.status.success());
    assert!(dir.path().join("control.db").exists());
}

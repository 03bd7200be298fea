//! Integration tests for the `box-calc` binary.
//!
//! These run the real `escape-cal` server through `$ESCAPE_CAL_SERVER` and
//! check the CSV it leaves behind.

use std::path::PathBuf;
use std::process::{Command, Output};

use pretty_assertions::assert_eq;

const BOX_CALC: &str = env!("CARGO_BIN_EXE_box-calc");
const SERVER: &str = env!("CARGO_BIN_EXE_escape-cal");
const SERVER_ENV: &str = "ESCAPE_CAL_SERVER";

fn output_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("box-calc-{}-{}.csv", std::process::id(), name))
}

fn run(args: &[&str]) -> Output {
    Command::new(BOX_CALC)
        .args(args)
        .env(SERVER_ENV, SERVER)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run box-calc")
}

#[test]
fn test_escaping_box_writes_csv() {
    let path = output_path("escaping");
    let output = run(&["1", "1", "3", "3", "2", "10", "2", path.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let csv = std::fs::read_to_string(&path).expect("CSV should exist");
    let _ = std::fs::remove_file(&path);

    // c = 1+i escapes at z2 = 1+3i; every other corner escapes at z1 = c.
    assert_eq!(
        csv,
        "CA,CB,ESCAPED,ITERATIONS,FINAL_ZA,FINAL_ZB\n\
         1@1,1@1,Y,2,1@1,3@1\n\
         1@1,3@1,Y,1,1@1,3@1\n\
         3@1,1@1,Y,1,3@1,1@1\n\
         3@1,3@1,Y,1,3@1,3@1\n"
    );
}

#[test]
fn test_usage_error_exits_one() {
    let output = run(&["1", "1", "3", "3"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage:"));
}

#[test]
fn test_invalid_bound_fails() {
    let path = output_path("invalid");
    let output = run(&["1", "1", "xyz", "3", "2", "10", "2", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!path.exists());
}

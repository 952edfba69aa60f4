//! CLI surface: help, version, usage errors.

use assert_cmd::cargo::cargo_bin;
use std::process::Command;

#[test]
fn fbuild_help_lists_commands() {
    let output = Command::new(cargo_bin("fbuild"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["build", "deploy", "monitor", "install-deps", "status", "cancel", "daemon"] {
        assert!(stdout.contains(command), "help missing {command}");
    }
}

#[test]
fn fbuild_unknown_command_is_usage_error() {
    let output = Command::new(cargo_bin("fbuild"))
        .arg("reticulate")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn fbuildd_version_and_help() {
    let version = Command::new(cargo_bin("fbuildd"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(version.status.success());
    assert!(String::from_utf8_lossy(&version.stdout).starts_with("fbuildd "));

    let help = Command::new(cargo_bin("fbuildd"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("request drop files"));
}

#[test]
fn fbuildd_rejects_unknown_argument() {
    let output = Command::new(cargo_bin("fbuildd"))
        .arg("--bogus")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

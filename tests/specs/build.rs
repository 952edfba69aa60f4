//! End-to-end build through the daemon.

use crate::prelude::*;
use std::time::Duration;

#[test]
fn build_produces_firmware_and_completed_status() {
    let world = World::new();
    world.start_daemon();
    let project = world.project("blink");

    let output = world
        .fbuild()
        .args(["build", "--project", project.to_str().unwrap(), "-e", "uno"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "build failed: {}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(project.join(".fbuild/build/uno/firmware.elf").exists());
    assert!(project.join(".fbuild/build/uno/firmware.hex").exists());

    let status = world.wait_for_status(Duration::from_secs(5), |s| s["state"] == "completed");
    assert_eq!(status["operation_in_progress"], false);

    // The file cache recorded the translation unit
    let cache = std::fs::read_to_string(world.daemon_dir.join("file_cache.json")).unwrap();
    assert!(cache.contains("main.cpp"));
}

#[test]
fn build_with_unknown_environment_fails() {
    let world = World::new();
    world.start_daemon();
    let project = world.project("blink");

    let output = world
        .fbuild()
        .args(["build", "--project", project.to_str().unwrap(), "-e", "teensy41"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn build_without_environment_is_usage_error() {
    let world = World::new();
    let project = world.project("blink");

    let output = world
        .fbuild()
        .args(["build", "--project", project.to_str().unwrap()])
        .output()
        .unwrap();
    // No -e: rejected client-side before any daemon interaction
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("environment"));
}

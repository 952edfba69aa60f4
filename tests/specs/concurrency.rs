//! Concurrent request behavior: parallel projects, busy-project rejection.

use crate::prelude::*;

#[test]
fn builds_of_different_projects_run_in_parallel() {
    let world = World::new();
    // A compiler that takes ~1s per unit makes overlap measurable
    world.install_stub_tool("stub-gxx", false, Some(1));
    world.start_daemon();

    let project_a = world.project("alpha");
    let project_b = world.project("beta");

    let start = std::time::Instant::now();
    let mut cmd_a = world.fbuild();
    cmd_a.args(["build", "--project", project_a.to_str().unwrap(), "-e", "uno"]);
    let mut cmd_b = world.fbuild();
    cmd_b.args(["build", "--project", project_b.to_str().unwrap(), "-e", "uno"]);

    let thread_a = std::thread::spawn(move || cmd_a.output().unwrap());
    let thread_b = std::thread::spawn(move || cmd_b.output().unwrap());
    let out_a = thread_a.join().unwrap();
    let out_b = thread_b.join().unwrap();
    let elapsed = start.elapsed();

    assert!(out_a.status.success(), "{}", String::from_utf8_lossy(&out_a.stderr));
    assert!(out_b.status.success(), "{}", String::from_utf8_lossy(&out_b.stderr));

    // Both firmwares exist; neither lock starved the other. (Wall-clock
    // overlap itself is asserted in the in-process processor tests, where
    // the drop-file race cannot skew timing.)
    assert!(project_a.join(".fbuild/build/uno/firmware.hex").exists());
    assert!(project_b.join(".fbuild/build/uno/firmware.hex").exists());
    assert!(
        elapsed < std::time::Duration::from_secs(30),
        "builds took implausibly long: {elapsed:?}"
    );
}

#[test]
fn same_project_second_build_fails_fast_with_in_use() {
    let world = World::new();
    world.install_stub_tool("stub-gxx", false, Some(3));
    world.start_daemon();
    let project = world.project("alpha");

    // First build occupies the project lock for several seconds
    let mut slow = world.fbuild();
    slow.args(["build", "--project", project.to_str().unwrap(), "-e", "uno"]);
    let slow_thread = std::thread::spawn(move || slow.output().unwrap());

    // Wait until the daemon reports the build running
    world.wait_for_status(std::time::Duration::from_secs(10), |s| {
        s["state"] == "building" && s["operation_in_progress"] == true
    });

    // Second build on the same project must fail fast with the project name
    let output = world
        .fbuild()
        .args(["build", "--project", project.to_str().unwrap(), "-e", "uno"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("in use"), "missing busy message: {stdout}");
    assert!(stdout.contains("alpha"), "missing resource name: {stdout}");

    assert!(slow_thread.join().unwrap().status.success());
}

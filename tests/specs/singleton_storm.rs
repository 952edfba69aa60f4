//! Singleton invariant under a concurrent spawn storm.

use crate::prelude::*;

#[test]
fn concurrent_starts_agree_on_one_daemon() {
    let world = World::new();

    // Eight launchers race; all must succeed and the PID file must name
    // exactly one live daemon that they all agree on.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mut cmd = world.fbuild();
            cmd.args(["daemon", "start"]);
            std::thread::spawn(move || cmd.output().unwrap())
        })
        .collect();

    let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for output in &outputs {
        assert!(
            output.status.success(),
            "launcher failed: {}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let pid = world.daemon_pid().expect("no daemon pid after storm");
    assert!(pid_alive(pid));

    // Every launcher that printed a pid printed this one
    for output in &outputs {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(reported) = stdout
            .split("pid ")
            .nth(1)
            .and_then(|rest| rest.trim_end_matches(")\n").trim().parse::<u32>().ok())
        {
            assert_eq!(reported, pid, "launcher disagreed: {stdout}");
        }
    }

    // The losers of the race must not have smeared the winner's status
    // file: wait for the winner's initial snapshot, give the losers time
    // to finish exiting, then confirm nobody published a failure.
    let status = world.wait_for_status(std::time::Duration::from_secs(5), |s| !s["state"].is_null());
    assert_ne!(status["state"], "failed", "loser overwrote status: {status}");
    std::thread::sleep(std::time::Duration::from_millis(750));
    let status = world.status().expect("status file vanished after storm");
    assert_ne!(status["state"], "failed", "loser overwrote status: {status}");
    assert_eq!(status["daemon_pid"], pid);
}

#[test]
fn stale_pid_file_is_replaced_by_fresh_daemon() {
    let world = World::new();

    // Write a PID file pointing at a process that is certainly dead
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    std::fs::write(
        world.daemon_dir.join("fbuild_daemon.pid"),
        format!("{dead_pid}\n"),
    )
    .unwrap();

    world.start_daemon();
    let pid = world.daemon_pid().unwrap();
    assert_ne!(pid, dead_pid);
    assert!(pid_alive(pid));
}

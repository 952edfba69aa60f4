//! Shared fixtures for the behavioral specs.

use assert_cmd::cargo::cargo_bin;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// One isolated daemon world: its own daemon directory, stub toolchain,
/// and project fixtures. The daemon (if started) is stopped on drop.
pub struct World {
    pub root: TempDir,
    pub daemon_dir: PathBuf,
}

impl World {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let daemon_dir = root.path().join("daemon");
        std::fs::create_dir_all(&daemon_dir).unwrap();

        let world = Self { root, daemon_dir };
        world.install_stub_tool("stub-gxx", false, None);
        world.install_stub_tool("stub-objcopy", false, None);
        world.install_stub_tool("stub-avrdude", false, None);
        world
    }

    /// Write a stub tool script. Stubs write their `-o` (or last) argument
    /// and can optionally sleep or fail.
    pub fn install_stub_tool(&self, name: &str, fail: bool, sleep_secs: Option<u32>) {
        let path = self.root.path().join(name);
        let sleep = sleep_secs.map(|s| format!("sleep {s}\n")).unwrap_or_default();
        let body = if fail {
            format!("#!/bin/sh\n{sleep}echo 'stub tool failure' >&2\nexit 1\n")
        } else {
            format!(
                r#"#!/bin/sh
{sleep}if [ "$1" = "--version" ]; then echo "stub 1.0"; exit 0; fi
out=""
prev=""
for a in "$@"; do
    if [ "$prev" = "-o" ]; then out="$a"; fi
    prev="$a"
done
if [ -z "$out" ]; then
    for a in "$@"; do
        case "$a" in -*) ;; *) out="$a" ;; esac
    done
fi
[ -n "$out" ] && echo "artifact" > "$out"
exit 0
"#
            )
        };
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    /// Create a minimal AVR project under the world root.
    pub fn project(&self, name: &str) -> PathBuf {
        let dir = self.root.path().join(name);
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/main.cpp"), "int main() { return 0; }").unwrap();
        std::fs::write(
            dir.join("platformio.ini"),
            "[env:uno]\nplatform = atmelavr\nboard = uno\n",
        )
        .unwrap();
        dir
    }

    /// An `fbuild` command wired to this world.
    pub fn fbuild(&self) -> Command {
        let mut cmd = Command::new(cargo_bin("fbuild"));
        self.apply_env(&mut cmd);
        cmd
    }

    fn apply_env(&self, cmd: &mut Command) {
        cmd.env("FBUILD_DAEMON_DIR", &self.daemon_dir)
            .env("FBUILD_DAEMON_BINARY", cargo_bin("fbuildd"))
            .env("FBUILD_AVR_GXX", self.root.path().join("stub-gxx"))
            .env("FBUILD_AVR_OBJCOPY", self.root.path().join("stub-objcopy"))
            .env("FBUILD_AVRDUDE", self.root.path().join("stub-avrdude"))
            .env("FBUILD_POLL_MS", "100")
            .env("FBUILD_ATTACH_TIMEOUT_SECS", "10");
    }

    /// Start the daemon and wait for it to come up.
    pub fn start_daemon(&self) {
        let output = self.fbuild().args(["daemon", "start"]).output().unwrap();
        assert!(
            output.status.success(),
            "daemon start failed: {}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        assert!(self.daemon_pid().is_some());
    }

    pub fn daemon_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.daemon_dir.join("fbuild_daemon.pid"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Parsed daemon_status.json, when present.
    pub fn status(&self) -> Option<serde_json::Value> {
        let content = std::fs::read_to_string(self.daemon_dir.join("daemon_status.json")).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Wait until `predicate` holds on the status document.
    pub fn wait_for_status(
        &self,
        timeout: Duration,
        predicate: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.status() {
                if predicate(&status) {
                    return status;
                }
            }
            assert!(
                Instant::now() < deadline,
                "status condition not met; last: {:?}",
                self.status()
            );
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if let Some(pid) = self.daemon_pid() {
            let _ = Command::new("kill").arg(pid.to_string()).status();
            // Give it a moment, then force
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline && pid_alive(pid) {
                std::thread::sleep(Duration::from_millis(50));
            }
            if pid_alive(pid) {
                let _ = Command::new("kill").args(["-9", &pid.to_string()]).status();
            }
        }
    }
}

pub fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

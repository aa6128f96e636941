#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

//! Fake `redis-server` / `redis-sentinel` executables.
//!
//! Each fake is a small shell script that picks `--port` out of its
//! arguments, prints the banner and readiness lines real Redis prints, then
//! execs `sleep` so it stays alive until signalled.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use embedded_redis::{ExecutableResolver, InstanceKind, LaunchOptions};
use tempfile::TempDir;

const PARSE_PORT: &str = r##"port=0
prev=""
for arg in "$@"; do
  if [ "$prev" = "--port" ]; then port="$arg"; fi
  prev="$arg"
done
"##;

pub struct FakeRedis {
    dir: TempDir,
}

impl FakeRedis {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Writes an executable script; `body` runs after the port is parsed.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{PARSE_PORT}{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn server(&self) -> PathBuf {
        self.script(
            "redis-server",
            r##"echo "$$:M 19 Oct 2026 10:15:02.117 * Running mode=standalone, port=$port."
echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
exec sleep 30
"##,
        )
    }

    /// Refuses to start unless its first argument is an existing sentinel.conf.
    pub fn sentinel(&self) -> PathBuf {
        self.script(
            "redis-sentinel",
            r##"case "$1" in
  *sentinel.conf) ;;
  *) echo "# Sentinel started without a config file. Exiting..."; exit 1 ;;
esac
[ -f "$1" ] || { echo "# config file missing"; exit 1; }
echo "$$:X 19 Oct 2026 10:15:02.117 * Running mode=sentinel, port=$port."
echo "$$:X 19 Oct 2026 10:15:02.117 # Sentinel ID is 8d2c3f0e2b1a4c5d"
exec sleep 30
"##,
        )
    }

    /// Prints a fatal error on both streams and exits.
    pub fn exiting(&self) -> PathBuf {
        self.script(
            "redis-server-broken",
            r##"echo "*** FATAL CONFIG FILE ERROR ***"
echo "Bad directive or wrong number of arguments" >&2
exit 1
"##,
        )
    }

    /// Never prints a readiness line.
    pub fn silent(&self) -> PathBuf {
        self.script(
            "redis-server-silent",
            r##"echo "$$:M 19 Oct 2026 10:15:02.117 * Server initialized"
exec sleep 30
"##,
        )
    }

    /// Becomes ready but ignores SIGTERM.
    pub fn stubborn(&self) -> PathBuf {
        self.script(
            "redis-server-stubborn",
            r##"trap '' TERM
echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
exec sleep 30
"##,
        )
    }

    /// Behaves like `server` except on `failing_port`, where it exits.
    pub fn server_failing_on(&self, failing_port: u16) -> PathBuf {
        self.script(
            "redis-server-flaky",
            &format!(
                r##"if [ "$port" = "{failing_port}" ]; then
  echo "# Could not create server TCP listening socket *:$port: bind: Address already in use"
  exit 1
fi
echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
exec sleep 30
"##
            ),
        )
    }

    /// Behaves like `server` except on `silent_port`, where it never
    /// prints the readiness line.
    pub fn server_silent_on(&self, silent_port: u16) -> PathBuf {
        self.script(
            "redis-server-stalling",
            &format!(
                r##"if [ "$port" = "{silent_port}" ]; then
  echo "$$:M 19 Oct 2026 10:15:02.117 * Loading RDB produced by version 7.2.4"
  exec sleep 30
fi
echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
exec sleep 30
"##
            ),
        )
    }

    /// Becomes ready, prints a non-UTF-8 line, then far more than a pipe
    /// buffer holds. Touches `marker` once every write went through.
    pub fn flooding(&self, marker: &Path) -> PathBuf {
        self.script(
            "redis-server-chatty",
            &format!(
                r##"echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
printf 'bad \377 byte\n'
yes "$$:M 19 Oct 2026 10:15:02.118 - Accepted 127.0.0.1:50912 filler filler filler" | head -n 4000
touch "{}"
exec sleep 30
"##,
                marker.display()
            ),
        )
    }

    /// Prints a non-UTF-8 line before the usual banner.
    pub fn garbled_banner(&self) -> PathBuf {
        self.script(
            "redis-server-garbled",
            r##"printf 'logo \377\376 art\n'
echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
exec sleep 30
"##,
        )
    }

    /// Announces `port` in its banner regardless of the port it was given.
    pub fn announcing(&self, port: u16) -> PathBuf {
        self.script(
            "redis-server-announcing",
            &format!(
                r##"echo "$$:M 19 Oct 2026 10:15:02.117 * Running mode=standalone, port={port}."
echo "$$:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
exec sleep 30
"##
            ),
        )
    }

    pub fn resolver(&self) -> ExecutableResolver {
        ExecutableResolver::new()
            .with_executable(InstanceKind::Server, self.server())
            .with_executable(InstanceKind::Sentinel, self.sentinel())
    }
}

pub fn fast_launch() -> LaunchOptions {
    LaunchOptions {
        startup_timeout: Duration::from_secs(5),
        stop_grace: Duration::from_millis(500),
        ..LaunchOptions::default()
    }
}

//! Readiness detection over a child's output lines.
//!
//! A spawned Redis process has no health endpoint we can poll before it is
//! up, so readiness is decided by matching its log lines. The match rule is a
//! [`ReadyPredicate`]; the defaults for servers and sentinels are
//! [`LinePattern`]s.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;

/// Decides readiness from a stream of output lines.
pub trait ReadyPredicate: Send + Sync + 'static {
    /// Returns `true` for the line that marks the process as ready.
    fn is_ready(&self, line: &str) -> bool;

    /// Returns the listening port if the line announces one.
    fn announced_port(&self, _line: &str) -> Option<u16> {
        None
    }
}

#[allow(clippy::expect_used)] // literal patterns, they don't panic
static SERVER_READY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Ready to accept connections").expect("static regex should not panic")
});

#[allow(clippy::expect_used)]
static SENTINEL_READY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sentinel (runid|ID) is").expect("static regex should not panic")
});

// "Running mode=standalone, port=6379." in the startup banner.
#[allow(clippy::expect_used)]
static PORT_ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bport=(\d{1,5})\b").expect("static regex should not panic")
});

/// Regex-based readiness rule with optional port discovery.
#[derive(Debug, Clone)]
pub struct LinePattern {
    ready: Regex,
    port: Option<Regex>,
}

impl LinePattern {
    /// Builds a pattern from a regular expression matched anywhere in a line.
    ///
    /// # Errors
    /// Returns `RedisError::InvalidPattern` if the expression does not compile.
    pub fn new(ready: &str) -> Result<Self> {
        Ok(Self {
            ready: Regex::new(ready)?,
            port: None,
        })
    }

    /// Data-serving loop is up: `Ready to accept connections`.
    #[must_use]
    pub fn server() -> Self {
        Self {
            ready: SERVER_READY.clone(),
            port: Some(PORT_ANNOUNCEMENT.clone()),
        }
    }

    /// Sentinel identity assigned: `Sentinel ID is ...` (older builds say `runid`).
    #[must_use]
    pub fn sentinel() -> Self {
        Self {
            ready: SENTINEL_READY.clone(),
            port: Some(PORT_ANNOUNCEMENT.clone()),
        }
    }

    /// Also discover the listening port from `port=<n>` announcements.
    #[must_use]
    pub fn with_port_announcement(mut self) -> Self {
        self.port = Some(PORT_ANNOUNCEMENT.clone());
        self
    }
}

impl ReadyPredicate for LinePattern {
    fn is_ready(&self, line: &str) -> bool {
        self.ready.is_match(line)
    }

    fn announced_port(&self, line: &str) -> Option<u16> {
        let caps = self.port.as_ref()?.captures(line)?;
        caps.get(1)?
            .as_str()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_pattern_matches_native_line() {
        let pattern = LinePattern::server();
        assert!(pattern.is_ready(
            "4242:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp"
        ));
        assert!(pattern.is_ready("* Ready to accept connections"));
        assert!(!pattern.is_ready("4242:M 19 Oct 2026 10:15:02.117 * Server initialized"));
    }

    #[test]
    fn test_sentinel_pattern_matches_both_spellings() {
        let pattern = LinePattern::sentinel();
        assert!(pattern.is_ready(
            "77:X 19 Oct 2026 10:15:02.117 # Sentinel ID is 8d2c3f0e2b1a4c"
        ));
        assert!(pattern.is_ready("77:X 01 Jan 2016 # Sentinel runid is 8d2c3f0e"));
        assert!(!pattern.is_ready("77:X * Ready to accept connections"));
    }

    #[test]
    fn test_server_pattern_does_not_match_sentinel_line() {
        assert!(!LinePattern::server().is_ready("# Sentinel ID is 8d2c3f0e"));
    }

    #[test]
    fn test_port_announcement() {
        let pattern = LinePattern::server();
        assert_eq!(
            pattern.announced_port("4242:M * Running mode=standalone, port=6380."),
            Some(6380)
        );
        assert_eq!(pattern.announced_port("Running mode=sentinel, port=0."), None);
        assert_eq!(pattern.announced_port("port=99999"), None);
        assert_eq!(pattern.announced_port("no port here"), None);
    }

    #[test]
    fn test_custom_pattern_has_no_port_discovery_by_default() {
        let pattern = LinePattern::new("^up$").unwrap();
        assert!(pattern.is_ready("up"));
        assert!(!pattern.is_ready("not up"));
        assert_eq!(pattern.announced_port("port=7000"), None);

        let pattern = pattern.with_port_announcement();
        assert_eq!(pattern.announced_port("port=7000"), Some(7000));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(LinePattern::new("(unclosed").is_err());
    }
}

//! Port bookkeeping: build-time allocation and launch-time reservation.

use std::collections::HashSet;
use std::fmt;
use std::net::TcpListener;

use serde::{Deserialize, Serialize};

use crate::error::{RedisError, Result};

/// A host:port pair clients connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Sequential allocator that never hands out the same port twice.
///
/// Port 0 means "chosen at launch" and is never recorded.
#[derive(Debug, Default)]
pub(crate) struct PortLedger {
    used: HashSet<u16>,
}

impl PortLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records an explicitly requested port.
    pub(crate) fn claim(&mut self, port: u16) -> Result<()> {
        if port == 0 {
            return Ok(());
        }
        if self.used.insert(port) {
            Ok(())
        } else {
            Err(RedisError::PortConflict { port })
        }
    }

    /// Returns the first unused port at or above `cursor` and advances it.
    pub(crate) fn allocate(&mut self, cursor: &mut PortCursor) -> Result<u16> {
        while let Ok(candidate) = u16::try_from(cursor.next) {
            cursor.next += 1;
            if candidate != 0 && self.used.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(RedisError::PortRangeExhausted { from: cursor.start })
    }
}

/// Position of a sequential allocation run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PortCursor {
    start: u16,
    next: u32,
}

impl PortCursor {
    pub(crate) fn starting_at(start: u16) -> Self {
        Self {
            start,
            next: u32::from(start),
        }
    }
}

/// Asks the OS for `count` distinct free ports on `host`.
///
/// All listeners are held until every port is known, so the ports are
/// distinct from each other. They are released on return; the caller is
/// expected to launch onto them right away.
pub(crate) fn reserve_ephemeral(host: &str, count: usize) -> Result<Vec<u16>> {
    let listeners = (0..count)
        .map(|_| TcpListener::bind((host, 0)))
        .collect::<std::io::Result<Vec<_>>>()?;
    let ports = listeners
        .iter()
        .map(|listener| listener.local_addr().map(|addr| addr.port()))
        .collect::<std::io::Result<Vec<_>>>()?;
    tracing::debug!(host, ports = ?ports, "reserved ephemeral ports");
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_skips_claimed_ports() {
        let mut ledger = PortLedger::new();
        ledger.claim(6380).unwrap();
        let mut cursor = PortCursor::starting_at(6379);

        assert_eq!(ledger.allocate(&mut cursor).unwrap(), 6379);
        assert_eq!(ledger.allocate(&mut cursor).unwrap(), 6381);
        assert_eq!(ledger.allocate(&mut cursor).unwrap(), 6382);
    }

    #[test]
    fn test_claim_rejects_duplicates_but_not_zero() {
        let mut ledger = PortLedger::new();
        ledger.claim(26379).unwrap();
        assert!(matches!(
            ledger.claim(26379),
            Err(RedisError::PortConflict { port: 26379 })
        ));
        ledger.claim(0).unwrap();
        ledger.claim(0).unwrap();
    }

    #[test]
    fn test_allocate_reports_exhaustion() {
        let mut ledger = PortLedger::new();
        let mut cursor = PortCursor::starting_at(u16::MAX);
        assert_eq!(ledger.allocate(&mut cursor).unwrap(), u16::MAX);
        assert!(matches!(
            ledger.allocate(&mut cursor),
            Err(RedisError::PortRangeExhausted { from: u16::MAX })
        ));
    }

    #[test]
    fn test_reserve_ephemeral_returns_distinct_ports() {
        let ports = reserve_ephemeral("127.0.0.1", 4).unwrap();
        assert_eq!(ports.len(), 4);
        let unique: HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), 4);
        assert!(ports.iter().all(|p| *p != 0));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("127.0.0.1", 6379).to_string(), "127.0.0.1:6379");
    }
}

//! SSH port allocation.
//!
//! Ports are picked by trying to bind each candidate on all interfaces and
//! releasing it immediately. This is check-then-use: the port was free when
//! probed, but the hypervisor binds it later and may lose a race with an
//! unrelated process.

use crate::config::PortRange;
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};

/// Result of a port scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChoice {
    /// A port that was bindable when probed.
    Free(u16),
    /// Nothing in the range was bindable; the configured fallback.
    Fallback(u16),
}

impl PortChoice {
    /// The port, whichever way it was chosen.
    pub fn port(self) -> u16 {
        match self {
            PortChoice::Free(port) | PortChoice::Fallback(port) => port,
        }
    }
}

/// Check whether a TCP port can be bound on all interfaces right now.
pub fn is_port_free(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

/// Scan `range` for a bindable port, skipping `taken`.
///
/// Never fails: an exhausted range yields [`PortChoice::Fallback`], which may
/// collide with a port in use.
pub fn allocate(range: &PortRange, taken: &HashSet<u16>) -> PortChoice {
    let end = range.end.min(u32::from(u16::MAX) + 1);
    for candidate in u32::from(range.start)..end {
        // end is clamped to 65536, so every candidate fits.
        let Ok(port) = u16::try_from(candidate) else {
            break;
        };
        if port == 0 || taken.contains(&port) {
            continue;
        }
        if is_port_free(port) {
            tracing::trace!(port, "allocated port");
            return PortChoice::Free(port);
        }
    }

    tracing::warn!(
        start = range.start,
        end = range.end,
        fallback = range.fallback,
        "no free port in range, using fallback"
    );
    PortChoice::Fallback(range.fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u16, end: u32, fallback: u16) -> PortRange {
        PortRange {
            start,
            end,
            fallback,
        }
    }

    fn occupied() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_exhausted_range_returns_fallback() {
        let (_a, port_a) = occupied();
        let choice = allocate(&range(port_a, u32::from(port_a) + 1, 2222), &HashSet::new());
        assert_eq!(choice, PortChoice::Fallback(2222));
        assert_eq!(choice.port(), 2222);
    }

    #[test]
    fn test_taken_ports_are_skipped() {
        let (listener, port) = occupied();
        drop(listener);
        let taken: HashSet<u16> = [port].into_iter().collect();
        let choice = allocate(&range(port, u32::from(port) + 1, 7), &taken);
        assert_eq!(choice, PortChoice::Fallback(7));
    }

    #[test]
    fn test_free_port_is_returned() {
        let (listener, port) = occupied();
        drop(listener);
        let choice = allocate(&range(port, u32::from(port) + 1, 7), &HashSet::new());
        assert_eq!(choice, PortChoice::Free(port));
        assert!(is_port_free(port));
    }
}

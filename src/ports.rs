//! Host port allocation for session containers.
//!
//! Hands out ports from a fixed range, probing the OS so that ports grabbed
//! by other processes (or recovered only partially after a restart) are
//! skipped. The allocator itself is plain data; the session manager guards it
//! with its table lock.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use crate::env;

/// Errors produced by the port allocator.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Every port in the range is allocated or bound by the OS.
    #[error("no free ports in range {}..{}", env::PORT_RANGE_START, env::PORT_RANGE_END)]
    NoPortsAvailable,
}

/// Allocator over the host port range `[start, end)`.
///
/// Not internally synchronized: callers hold the manager lock around
/// `acquire`/`release` so the allocation set and the session table mutate
/// together.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    allocated: HashSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(env::PORT_RANGE_START, env::PORT_RANGE_END)
    }
}

impl PortAllocator {
    /// Create an allocator over the half-open range `[start, end)`.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            allocated: HashSet::new(),
        }
    }

    /// Acquire the lowest free port in the range.
    ///
    /// Skips ports in the in-memory allocation set and ports the OS reports
    /// as bound. The probe is a momentary non-listening bind released before
    /// returning, so another local process can still race us to the port;
    /// the container start will surface that as a bind failure.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::NoPortsAvailable`] when the range is exhausted.
    pub fn acquire(&mut self) -> Result<u16, PortError> {
        for port in self.start..self.end {
            if self.allocated.contains(&port) {
                continue;
            }
            if !os_port_free(port) {
                continue;
            }
            self.allocated.insert(port);
            return Ok(port);
        }
        Err(PortError::NoPortsAvailable)
    }

    /// Release a previously acquired port. Idempotent.
    pub fn release(&mut self, port: u16) {
        self.allocated.remove(&port);
    }

    /// Mark a port as allocated without probing, used when recovery installs
    /// sessions whose containers already hold their port binding.
    pub fn mark_allocated(&mut self, port: u16) {
        self.allocated.insert(port);
    }

    /// Number of ports currently held.
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }
}

/// Probe whether the OS will let us bind `0.0.0.0:port`.
fn os_port_free(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_ascending_and_unique() {
        let mut alloc = PortAllocator::new(17000, 17010);

        let a = alloc.acquire().unwrap();
        let b = alloc.acquire().unwrap();
        assert!(a < b, "ports should be handed out in ascending order");
        assert_ne!(a, b);
        assert_eq!(alloc.allocated_count(), 2);
    }

    #[test]
    fn test_release_is_idempotent_and_reusable() {
        let mut alloc = PortAllocator::new(17020, 17025);

        let a = alloc.acquire().unwrap();
        alloc.release(a);
        alloc.release(a);
        assert_eq!(alloc.allocated_count(), 0);

        // The freed port is the lowest again.
        assert_eq!(alloc.acquire().unwrap(), a);
    }

    #[test]
    fn test_exhaustion() {
        let mut alloc = PortAllocator::new(17030, 17032);

        let mut got = Vec::new();
        while let Ok(p) = alloc.acquire() {
            got.push(p);
        }
        assert!(got.len() <= 2);
        assert!(matches!(alloc.acquire(), Err(PortError::NoPortsAvailable)));
    }

    #[test]
    fn test_os_bound_port_is_skipped() {
        // Hold a listener on the first port of the range; acquire must skip it.
        let listener =
            TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let held = listener.local_addr().unwrap().port();

        let mut alloc = PortAllocator::new(held, held.saturating_add(3));
        let got = alloc.acquire().unwrap();
        assert_ne!(got, held);
    }

    #[test]
    fn test_mark_allocated_blocks_reuse() {
        let mut alloc = PortAllocator::new(17040, 17043);
        alloc.mark_allocated(17040);
        assert_ne!(alloc.acquire().unwrap(), 17040);
    }
}

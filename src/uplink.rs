//! The `Uplink` collaborator interface (§6, §4.H).
//!
//! A gateway-role node exfiltrates mesh traffic (and a periodic routing
//! table snapshot) to an upstream IP transport through this trait. The core
//! never sees sockets or serial ports, same as it never sees an actual
//! radio chip.

/// Narrow interface over whatever carries traffic off the mesh (Wi-Fi,
/// cellular, a wired uplink to a base station).
pub trait Uplink {
    /// Whether the uplink currently has a usable connection.
    fn connected(&self) -> bool;

    /// Sends `len` bytes of `bytes` upstream. Returns whether the send
    /// succeeded; failures are non-fatal (§7), the caller logs and counts.
    async fn send(&mut self, bytes: &[u8], len: usize) -> bool;
}

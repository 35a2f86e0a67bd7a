//! The `RadioLink` collaborator interface (§6).
//!
//! This crate drives a half-duplex long-range radio but never talks to one
//! directly: callers hand the engine an implementation of this trait, the
//! same way the teacher's simulation swaps in `SimulatedRadioDevice` in
//! place of a real LoRa transceiver.

use embassy_time::Duration;

use crate::config::RadioPhyConfig;
use crate::error::RadioError;

/// Narrow interface over a physical (or simulated) half-duplex radio.
pub trait RadioLink {
    /// Applies physical-layer parameters; called once at startup.
    async fn configure(&mut self, phy: &RadioPhyConfig) -> Result<(), RadioError>;

    /// Transmits `bytes` and returns once the radio reports the transmission
    /// complete.
    async fn transmit(&mut self, bytes: &[u8]) -> Result<(), RadioError>;

    /// Waits for and returns the next received frame, written into `buf`.
    /// Returns the number of bytes written.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RadioError>;

    /// RSSI of the last received frame, in dBm.
    fn rssi(&self) -> i16;

    /// SNR of the last received frame, in dB.
    fn snr(&self) -> i8;

    /// Whether the channel is currently busy (for pre-TX collision
    /// avoidance).
    fn channel_busy(&self) -> bool;

    /// Estimated on-air time for a frame of `payload_len` bytes at the
    /// configured physical-layer parameters.
    fn time_on_air(&self, payload_len: usize) -> Duration;
}

//! Typed error hierarchy.
//!
//! Only construction-time and configuration failures are propagated as
//! `Result::Err` (see §7 of the design: the data plane never returns an
//! error, it logs and increments a counter instead).

use thiserror::Error;

use crate::address::Address;

/// Errors returned by [`crate::config::EngineConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("max_packet_size {0} out of range 13..=255")]
    PacketSizeOutOfRange(u16),
    #[error("duty_cycle_pct {0} out of range 0..=100")]
    DutyCycleOutOfRange(u8),
    #[error("rt_max_size must be nonzero")]
    ZeroRoutingTableSize,
    #[error("max_timeouts must be nonzero")]
    ZeroMaxTimeouts,
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Errors surfaced by the radio driver collaborator.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RadioError {
    #[error("SPI transaction failed")]
    Spi,
    #[error("radio did not acknowledge configuration")]
    Configure,
    #[error("transmit failed")]
    Transmit,
    #[error("receive failed")]
    Receive,
}

/// Errors surfaced to callers of the wire codec (§4.A).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("encoded frame of {0} bytes exceeds the configured max_packet_size {1}")]
    Oversize(usize, u16),
    #[error("declared packet_size {declared} does not match {actual} bytes read")]
    Truncated { declared: u8, actual: usize },
    #[error("unrecognized packet type byte 0x{0:02x}")]
    UnknownKind(u8),
    #[error("payload CRC mismatch")]
    CrcMismatch,
    #[error("buffer too short to contain a header")]
    TooShort,
}

/// Top-level errors returned by the [`crate::engine::Engine`] application API.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum EngineError {
    #[error("no route to destination {0:#06x}")]
    Unreachable(Address),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("send queue is full")]
    QueueFull,
    #[error(transparent)]
    Radio(#[from] RadioError),
}

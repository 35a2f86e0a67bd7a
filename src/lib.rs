//! Multi-hop mesh routing and reliable transport engine for half-duplex,
//! long-range radio links.
//!
//! The crate is organized the way the teacher organizes its simulator: one
//! module per concern (routing table, scheduler, reliable transport,
//! dispatcher, ambient configuration/error/stats plumbing), composed by a
//! single [`engine::Engine`] that the embedder constructs with its own
//! [`radio::RadioLink`] and [`uplink::Uplink`] implementations.

pub mod address;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod hello;
pub mod packet;
pub mod queue;
pub mod radio;
pub mod routing;
pub mod scheduler;
pub mod selector;
pub mod stats;
pub mod transport;
pub mod uplink;

pub use address::{Address, Role, ADDR_4G, ADDR_BROADCAST, ADDR_WIFI, NO_DESTINATION};
pub use config::{EngineConfig, RadioPhyConfig};
pub use engine::{Engine, EngineShared};
pub use error::{CodecError, ConfigError, EngineError, RadioError};
pub use packet::{Packet, PacketCodec, PacketKind};
pub use radio::RadioLink;
pub use routing::RouteEntry;
pub use stats::{Stats, StatsSnapshot};
pub use uplink::Uplink;

//! # packet-handler
//!
//! A pluggable pipeline for UDP game traffic. Datagrams pass through an ordered chain of
//! components that each add or strip one layer of framing.
//!
//! ## Modules
//! - [`core`]: bit buffers and the packet types shared by every stage
//! - [`protocol`]: the [`PacketHandler`] orchestrator and its built-in components
//! - [`ddos`]: a per-frame rate limiting state machine for the receive loop
//! - [`config`]: TOML / environment configuration with validation
//! - [`error`]: the crate error type
//! - [`utils`]: compression helpers, logging setup, metrics
//!
//! ## Example
//! ```rust
//! use packet_handler::{HandlerMode, OutgoingPacketTraits, PacketHandler, PipelineConfig};
//!
//! # fn main() -> packet_handler::Result<()> {
//! let config = PipelineConfig::default();
//! let mut server = PacketHandler::from_config(HandlerMode::Server, &config, |bytes, _bits, addr| {
//!     // hand `bytes` to the socket, addressed to `addr` when present
//!     let _ = (bytes, addr);
//! })?;
//! assert!(server.is_fully_initialized());
//!
//! let mut traits = OutgoingPacketTraits::default();
//! let out = server.outgoing(&[0xAB, 0xCD], 16, &mut traits);
//! assert!(!out.error);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod ddos;
pub mod error;
pub mod protocol;
pub mod utils;

pub use crate::config::PipelineConfig;
pub use crate::core::{BitBuffer, BufferedPacket, ComponentId, OutgoingPacketTraits, ProcessedPacket};
pub use crate::ddos::{DdosDetector, SeverityEscalation};
pub use crate::error::{HandlerError, Result};
pub use crate::protocol::{
    AesEncryptionComponent, ChallengeSuccess, CompressionComponent, ComponentState,
    HandlerComponent, HandlerMode, HandlerState, PacketHandler, ReliabilityComponent,
    StatelessConnectComponent,
};

//! # Packet Pipeline
//!
//! The [`PacketHandler`] orchestrator and the components it chains together.
//!
//! ## Components
//! - **Handshake**: [`StatelessConnectComponent`], cookie-based address validation with no
//!   per-attempt server state
//! - **Reliability**: [`ReliabilityComponent`], in-order delivery with timed retransmission
//! - **Encryption**: [`AesEncryptionComponent`], AES-256 with termination-bit padding
//! - **Compression**: [`CompressionComponent`], LZ4/Zstd when it actually shrinks the packet
//!
//! ## Typical Chain
//! ```text
//! outgoing ─▶ reliability ─▶ compression ─▶ encryption ─▶ stateless_connect ─▶ socket
//! incoming ◀─ reliability ◀─ compression ◀─ encryption ◀─ stateless_connect ◀─ socket
//! ```
//! The handshake is registered last so raw handshake packets reach it before any other stage.

pub mod component;
pub mod compression;
pub mod encryption;
pub mod handler;
pub mod handshake;
pub mod reliability;

pub use component::{ComponentState, HandlerComponent, HandlerMode, HandlerState, LowLevelSendFn};
pub use compression::CompressionComponent;
pub use encryption::AesEncryptionComponent;
pub use handler::PacketHandler;
pub use handshake::{ChallengeSuccess, Cookie, StatelessConnectComponent};
pub use reliability::ReliabilityComponent;

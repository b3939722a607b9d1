//! # Error Types
//!
//! Error handling for the packet pipeline.
//!
//! Packet-path failures never surface as `Err`: components flag the packet buffer and the
//! handler folds that into [`ProcessedPacket::error`](crate::core::packet::ProcessedPacket).
//! `HandlerError` covers everything that *can* fail loudly:
//!
//! ## Error Categories
//! - **Configuration Errors**: missing encryption keys, reserved bits that do not fit the
//!   socket's packet size, empty DDoS ladders. Fatal at startup.
//! - **State Errors**: chain mutation after initialisation, double initialisation
//! - **Bit Stream Errors**: reading past the end of a packet, malformed packed integers
//! - **Cryptographic / Compression Errors**: cipher setup and codec failures inside components
//!
//! ## Example Usage
//! ```rust
//! use packet_handler::error::{HandlerError, Result};
//! use packet_handler::config::PipelineConfig;
//! use tracing::error;
//!
//! fn load(text: &str) -> Result<PipelineConfig> {
//!     let config = PipelineConfig::from_toml(text)?;
//!     config.validate_strict()?;
//!     Ok(config)
//! }
//!
//! if let Err(e) = load("[handler]\nmax_packet_bits = 8") {
//!     error!(error = %e, "Rejected pipeline configuration");
//!     assert!(matches!(e, HandlerError::ConfigError(_)));
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Chain construction errors
    pub const ERR_ALREADY_INITIALIZED: &str = "Packet handler components are already initialized";
    pub const ERR_COMPONENT_AFTER_INIT: &str =
        "Components can only be added before initialize_components()";

    /// Configuration errors
    pub const ERR_MISSING_ENCRYPTION_KEY: &str = "Encryption requested but no key is configured";
    pub const ERR_INVALID_KEY_LENGTH: &str = "Encryption key must be exactly 32 bytes";
    pub const ERR_RESERVED_BITS: &str = "Reserved packet bits do not fit in max_packet_bits";
    pub const ERR_EMPTY_SEVERITY_LADDER: &str = "DDoS detection requires at least one severity level";

    /// Bit stream errors
    pub const ERR_MALFORMED_PACKED_INT: &str = "Packed integer exceeds 32 bits";

    /// Cryptographic errors
    pub const ERR_MAC_INIT: &str = "Failed to initialise cookie MAC";
}

/// HandlerError is the primary error type for all pipeline operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid handler state: {0}")]
    InvalidState(String),

    #[error("Bit stream overflow: requested {requested} bits, {remaining} remaining")]
    ReadOverflow { requested: usize, remaining: usize },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Encryption error: {0}")]
    CryptoError(String),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Logging error: {0}")]
    LoggingError(String),
}

/// Type alias for Results using HandlerError
pub type Result<T> = std::result::Result<T, HandlerError>;

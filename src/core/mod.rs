//! # Core Framing Types
//!
//! Bit-level buffers and the packet types every pipeline stage exchanges.
//!
//! ## Components
//! - **Bits**: [`BitBuffer`](bits::BitBuffer) with packed-integer coding and termination framing
//! - **Packet**: `ProcessedPacket`, `OutgoingPacketTraits`, `BufferedPacket`
//!
//! ## Wire Framing
//! ```text
//! [component headers ...][payload bits][1][0 padding to byte boundary]
//! ```
//! The trailing `1` lets the receiver recover the exact bit length of a datagram without a
//! length field. A datagram whose final byte is zero is malformed.

pub mod bits;
pub mod packet;

pub use bits::{terminated_bit_count, BitBuffer};
pub use packet::{BufferedPacket, ComponentId, OutgoingPacketTraits, ProcessedPacket};

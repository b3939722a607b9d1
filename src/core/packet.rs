//! Packet types shared by the handler and its components.

use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

/// Index of a component within its handler's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

/// Result of running a datagram through the pipeline.
///
/// Borrows the handler's scratch buffer, so it cannot outlive the call that produced it.
/// `bit_count == 0` without `error` means the packet was consumed by a component or silently
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedPacket<'a> {
    pub data: &'a [u8],
    pub bit_count: u32,
    pub error: bool,
}

impl<'a> ProcessedPacket<'a> {
    /// Packet with data
    pub fn new(data: &'a [u8], bit_count: u32) -> Self {
        Self {
            data,
            bit_count,
            error: false,
        }
    }

    /// Nothing left to deliver; not an error
    pub fn empty() -> Self {
        Self {
            data: &[],
            bit_count: 0,
            error: false,
        }
    }

    /// Packet rejected as corrupt or adversarial
    pub fn failed() -> Self {
        Self {
            data: &[],
            bit_count: 0,
            error: true,
        }
    }

    /// True when there is no payload to deliver (consumed, dropped or failed)
    pub fn is_empty(&self) -> bool {
        self.bit_count == 0
    }
}

/// Per-packet metadata threaded through every outgoing component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingPacketTraits {
    /// Whether a compressor may touch this packet
    pub allow_compression: bool,
    /// Bits the connection spent on acks
    pub ack_bit_count: u32,
    /// Bits the connection spent on bunch data
    pub bunch_bit_count: u32,
    /// Packet only keeps the connection alive
    pub is_keep_alive: bool,
    /// Set by a compressor once it has compressed the packet
    pub is_compressed: bool,
}

impl Default for OutgoingPacketTraits {
    fn default() -> Self {
        Self {
            allow_compression: true,
            ack_bit_count: 0,
            bunch_bit_count: 0,
            is_keep_alive: false,
            is_compressed: false,
        }
    }
}

/// An owned outgoing packet whose send has been deferred
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedPacket {
    pub data: Bytes,
    pub bit_count: u32,
    pub traits: OutgoingPacketTraits,
    /// When the owner should send it again, measured on the owner's tick clock
    pub resend_deadline: Option<Duration>,
    pub sequence_id: u32,
    /// Component that queued the packet; outgoing processing resumes after it
    pub origin_component: Option<ComponentId>,
    /// Present only for connectionless sends
    pub destination_address: Option<SocketAddr>,
    /// Skip the component chain entirely
    pub raw_send: bool,
}

impl BufferedPacket {
    /// Buffer a copy of `bit_count` bits from `data`
    pub fn new(data: &[u8], bit_count: u32, traits: OutgoingPacketTraits) -> Self {
        let byte_count = (bit_count as usize).div_ceil(8).min(data.len());
        Self {
            data: Bytes::copy_from_slice(&data[..byte_count]),
            bit_count,
            traits,
            resend_deadline: None,
            sequence_id: 0,
            origin_component: None,
            destination_address: None,
            raw_send: false,
        }
    }

    /// Control packet that bypasses the chain
    pub fn raw(data: &[u8], bit_count: u32, destination_address: Option<SocketAddr>) -> Self {
        Self {
            destination_address,
            raw_send: true,
            ..Self::new(data, bit_count, OutgoingPacketTraits::default())
        }
    }

    /// Set the resend deadline and sequence id
    pub fn with_resend(mut self, deadline: Duration, sequence_id: u32) -> Self {
        self.resend_deadline = Some(deadline);
        self.sequence_id = sequence_id;
        self
    }
}

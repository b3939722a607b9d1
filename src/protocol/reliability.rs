//! # Reliability Component
//!
//! In-order, at-least-once delivery for every packet that passes through it.
//!
//! ## Wire Format
//! ```text
//! [ack: packed u32][packet id: packed u32][payload]
//! ```
//! `ack` is the highest remote packet id accepted so far. Packet ids start at 1. A packet id of
//! 0 marks an ack-only packet with no payload; it is never buffered or resent.
//!
//! ## Behaviour
//! - Incoming packets are accepted only when their id is exactly one past the last accepted id.
//!   Anything else is dropped silently and recovered by the sender's retransmission.
//! - An ack that moves backwards between in-order packets, or acknowledges a packet never sent,
//!   marks the packet corrupt. Ack-only packets are unordered, so a stale one is dropped.
//! - A side that receives without sending acknowledges on its resend timer with an ack-only
//!   packet, so the sender can release its buffer.
//! - Every wrapped outgoing packet is kept until acknowledged and resent, oldest first, each
//!   time its deadline passes. Resends re-enter the pipeline after this component, so outer
//!   stages (encryption, handshake framing) wrap them again.

use crate::config::ReliabilityConfig;
use crate::core::{BitBuffer, BufferedPacket, OutgoingPacketTraits};
use crate::core::bits::MAX_PACKED_U32_BITS;
use crate::protocol::component::{ComponentState, HandlerComponent, HandlerMode};
use crate::utils::metrics::global_metrics;
use std::any::Any;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Packet id of a header-only acknowledgement
const ACK_ONLY_PACKET_ID: u32 = 0;

/// Packet reliability over an unreliable transport
#[derive(Debug)]
pub struct ReliabilityComponent {
    state: ComponentState,
    resend_resolution_time: Duration,
    /// Component clock, advanced by `tick`
    now: Duration,
    last_resend_time: Duration,
    /// Next id to assign
    local_packet_id: u32,
    /// Highest local id the remote has acknowledged
    local_packet_id_acked: u32,
    /// Highest remote id accepted
    remote_packet_id: u32,
    /// Highest remote id written into an outgoing header
    remote_packet_id_acked: u32,
    /// Ack carried by the last accepted in-order packet
    last_in_order_ack: u32,
    /// Sent but unacknowledged packets, oldest first
    buffered_packets: VecDeque<BufferedPacket>,
    outbox: VecDeque<BufferedPacket>,
}

impl ReliabilityComponent {
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self::with_resend_resolution(config.resend_resolution_time)
    }

    pub fn with_resend_resolution(resend_resolution_time: Duration) -> Self {
        Self {
            state: ComponentState::Uninitialized,
            resend_resolution_time,
            now: Duration::ZERO,
            last_resend_time: Duration::ZERO,
            local_packet_id: 1,
            local_packet_id_acked: 0,
            remote_packet_id: 0,
            remote_packet_id_acked: 0,
            last_in_order_ack: 0,
            buffered_packets: VecDeque::new(),
            outbox: VecDeque::new(),
        }
    }

    pub fn resend_resolution_time(&self) -> Duration {
        self.resend_resolution_time
    }

    /// Id the next outgoing packet will carry
    pub fn local_packet_id(&self) -> u32 {
        self.local_packet_id
    }

    pub fn local_packet_id_acked(&self) -> u32 {
        self.local_packet_id_acked
    }

    pub fn remote_packet_id(&self) -> u32 {
        self.remote_packet_id
    }

    pub fn remote_packet_id_acked(&self) -> u32 {
        self.remote_packet_id_acked
    }

    /// Packets awaiting acknowledgement
    pub fn unacked_packet_count(&self) -> usize {
        self.buffered_packets.len()
    }

    fn record_ack(&mut self, ack: u32) {
        self.local_packet_id_acked = self.local_packet_id_acked.max(ack);
        self.release_acked_packets();
    }

    fn queue_ack(&mut self) {
        let mut ack = BitBuffer::with_capacity_bits(2 * MAX_PACKED_U32_BITS as usize);
        ack.write_packed_u32(self.remote_packet_id);
        ack.write_packed_u32(ACK_ONLY_PACKET_ID);
        self.remote_packet_id_acked = self.remote_packet_id;

        trace!(ack = self.remote_packet_id, "Sending ack-only packet");
        self.outbox.push_back(BufferedPacket::new(
            ack.as_bytes(),
            ack.num_bits() as u32,
            OutgoingPacketTraits {
                allow_compression: false,
                ..OutgoingPacketTraits::default()
            },
        ));
    }

    fn release_acked_packets(&mut self) {
        while self
            .buffered_packets
            .front()
            .is_some_and(|p| p.sequence_id <= self.local_packet_id_acked)
        {
            self.buffered_packets.pop_front();
        }
    }
}

impl Default for ReliabilityComponent {
    fn default() -> Self {
        Self::new(&ReliabilityConfig::default())
    }
}

impl HandlerComponent for ReliabilityComponent {
    fn name(&self) -> &'static str {
        "reliability"
    }

    fn state(&self) -> ComponentState {
        self.state
    }

    fn initialize(&mut self, _mode: HandlerMode) {
        self.state = ComponentState::Initialized;
    }

    fn incoming(&mut self, packet: &mut BitBuffer) {
        let header = packet
            .read_packed_u32()
            .and_then(|ack| Ok((ack, packet.read_packed_u32()?)));
        let (ack, packet_id) = match header {
            Ok(header) => header,
            Err(e) => {
                debug!(error = %e, "Malformed reliability header");
                packet.set_error();
                return;
            }
        };

        if ack >= self.local_packet_id {
            debug!(ack, sent = self.local_packet_id - 1, "Ack for a packet never sent");
            packet.set_error();
            return;
        }

        if packet_id == ACK_ONLY_PACKET_ID {
            self.record_ack(ack);
            packet.drop_silently();
            return;
        }

        if packet_id != self.remote_packet_id.wrapping_add(1) {
            trace!(
                packet_id,
                expected = self.remote_packet_id.wrapping_add(1),
                "Dropping out-of-order reliable packet"
            );
            packet.drop_silently();
            return;
        }

        if ack < self.last_in_order_ack {
            debug!(ack, previous = self.last_in_order_ack, "Reliability ack moved backwards");
            packet.set_error();
            return;
        }

        self.remote_packet_id = packet_id;
        self.last_in_order_ack = ack;
        self.record_ack(ack);
    }

    fn outgoing(&mut self, packet: &mut BitBuffer, traits: &mut OutgoingPacketTraits) {
        let mut wrapped = BitBuffer::with_capacity_bits(
            packet.remaining_bits() + 2 * MAX_PACKED_U32_BITS as usize,
        );
        wrapped.write_packed_u32(self.remote_packet_id);
        wrapped.write_packed_u32(self.local_packet_id);
        wrapped.append_remaining(packet);

        self.remote_packet_id_acked = self.remote_packet_id;

        self.buffered_packets.push_back(
            BufferedPacket::new(wrapped.as_bytes(), wrapped.num_bits() as u32, *traits)
                .with_resend(
                    self.now.saturating_add(self.resend_resolution_time),
                    self.local_packet_id,
                ),
        );
        self.local_packet_id = self.local_packet_id.wrapping_add(1).max(1);

        *packet = wrapped;
    }

    fn tick(&mut self, delta_time: f32) {
        let delta = Duration::try_from_secs_f32(delta_time.max(0.0)).unwrap_or(Duration::MAX);
        self.now = self.now.saturating_add(delta);

        if self.now.saturating_sub(self.last_resend_time) < self.resend_resolution_time {
            return;
        }
        self.last_resend_time = self.now;
        self.release_acked_packets();

        if self.remote_packet_id_acked != self.remote_packet_id {
            self.queue_ack();
        }

        let next_deadline = self.now.saturating_add(self.resend_resolution_time);
        for packet in self.buffered_packets.iter_mut() {
            if packet.resend_deadline.is_some_and(|deadline| deadline <= self.now) {
                trace!(sequence_id = packet.sequence_id, "Resending reliable packet");
                packet.resend_deadline = Some(next_deadline);
                global_metrics().resend();
                self.outbox.push_back(packet.clone());
            }
        }
    }

    fn is_valid(&self) -> bool {
        !self.resend_resolution_time.is_zero()
    }

    fn reserved_packet_bits(&self) -> u32 {
        2 * MAX_PACKED_U32_BITS
    }

    fn poll_handler_packet(&mut self) -> Option<BufferedPacket> {
        self.outbox.pop_front()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

//! Packet compression stage.
//!
//! Wire format: `[compressed: 1]` followed by either the untouched payload or
//! `[original bit count: packed u32][compressed bytes]`. The compressed form is used only when
//! it is strictly smaller than the payload it replaces.

use crate::config::CompressionConfig;
use crate::core::{BitBuffer, OutgoingPacketTraits};
use crate::protocol::component::{ComponentState, HandlerComponent, HandlerMode};
use crate::utils::compression::{self, CompressionKind};
use std::any::Any;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct CompressionComponent {
    state: ComponentState,
    kind: CompressionKind,
    level: i32,
    threshold_bytes: usize,
    /// Upper bound on a decompressed payload, in bits
    max_payload_bits: u32,
}

impl CompressionComponent {
    pub fn new(kind: CompressionKind, level: i32, threshold_bytes: usize, max_payload_bits: u32) -> Self {
        Self {
            state: ComponentState::Uninitialized,
            kind,
            level,
            threshold_bytes,
            max_payload_bits,
        }
    }

    pub fn from_config(config: &CompressionConfig, max_packet_bits: u32) -> Self {
        Self::new(config.kind, config.level, config.threshold_bytes, max_packet_bits)
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    fn compressed_form(&self, payload: &[u8], bit_count: usize) -> Option<BitBuffer> {
        let compressed = match compression::maybe_compress(payload, self.kind, self.level, self.threshold_bytes) {
            Ok(Some(compressed)) => compressed,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Compression failed, sending uncompressed");
                return None;
            }
        };

        let mut out = BitBuffer::with_capacity_bits(1 + 40 + compressed.len() * 8);
        out.write_bit(true);
        out.write_packed_u32(bit_count as u32);
        out.write_bytes(&compressed);
        (out.num_bits() < bit_count + 1).then_some(out)
    }
}

impl HandlerComponent for CompressionComponent {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn state(&self) -> ComponentState {
        self.state
    }

    fn initialize(&mut self, _mode: HandlerMode) {
        self.state = ComponentState::Initialized;
    }

    fn incoming(&mut self, packet: &mut BitBuffer) {
        match packet.read_bit() {
            Ok(false) => return,
            Ok(true) => {}
            Err(_) => {
                packet.set_error();
                return;
            }
        }

        let bit_count = match packet.read_packed_u32() {
            Ok(bits) if bits <= self.max_payload_bits => bits as usize,
            Ok(bits) => {
                debug!(bits, max = self.max_payload_bits, "Compressed packet claims oversized payload");
                packet.set_error();
                return;
            }
            Err(e) => {
                debug!(error = %e, "Malformed compression header");
                packet.set_error();
                return;
            }
        };

        if packet.remaining_bits() % 8 != 0 {
            packet.set_error();
            return;
        }
        let mut data = vec![0u8; packet.remaining_bits() / 8];
        if packet.read_bytes(&mut data).is_err() {
            packet.set_error();
            return;
        }

        let expected_len = bit_count.div_ceil(8);
        match compression::decompress(&data, self.kind, expected_len) {
            Ok(payload) if payload.len() == expected_len => {
                trace!(compressed = data.len(), bits = bit_count, "Decompressed packet");
                packet.set_data(&payload, bit_count);
            }
            Ok(_) | Err(_) => {
                debug!("Decompression failed");
                packet.set_error();
            }
        }
    }

    fn outgoing(&mut self, packet: &mut BitBuffer, traits: &mut OutgoingPacketTraits) {
        let bit_count = packet.remaining_bits();

        if traits.allow_compression && !traits.is_compressed {
            let mut payload = Vec::with_capacity(bit_count.div_ceil(8));
            packet.copy_remaining_into(&mut payload);
            if let Some(compressed) = self.compressed_form(&payload, bit_count) {
                traits.is_compressed = true;
                *packet = compressed;
                return;
            }
        }

        let mut wrapped = BitBuffer::with_capacity_bits(bit_count + 1);
        wrapped.write_bit(false);
        wrapped.append_remaining(packet);
        *packet = wrapped;
    }

    fn is_valid(&self) -> bool {
        match self.kind {
            CompressionKind::Lz4 => true,
            CompressionKind::Zstd => (1..=22).contains(&self.level),
        }
    }

    fn reserved_packet_bits(&self) -> u32 {
        1
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn component(kind: CompressionKind) -> CompressionComponent {
        CompressionComponent::new(kind, 3, 32, 8192)
    }

    #[test]
    fn test_repetitive_payload_is_compressed() {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let mut sender = component(kind);
            let mut traits = OutgoingPacketTraits::default();
            let mut packet = BitBuffer::from_bytes(&[0x11; 200], 1595);
            sender.outgoing(&mut packet, &mut traits);
            assert!(traits.is_compressed);
            assert!(packet.num_bits() < 1596);

            let mut receiver = component(kind);
            receiver.incoming(&mut packet);
            assert!(!packet.is_error());
            assert_eq!(packet.remaining_bits(), 1595);
            let mut out = Vec::new();
            packet.copy_remaining_into(&mut out);
            assert_eq!(out, BitBuffer::from_bytes(&[0x11; 200], 1595).as_bytes());
        }
    }

    #[test]
    fn test_disallowed_or_small_payload_passes_through() {
        let mut sender = component(CompressionKind::Lz4);
        let mut traits = OutgoingPacketTraits {
            allow_compression: false,
            ..OutgoingPacketTraits::default()
        };
        let mut packet = BitBuffer::from_bytes(&[0u8; 200], 1600);
        sender.outgoing(&mut packet, &mut traits);
        assert!(!traits.is_compressed);
        assert_eq!(packet.num_bits(), 1601);

        let mut traits = OutgoingPacketTraits::default();
        let mut small = BitBuffer::from_bytes(&[0u8; 4], 32);
        sender.outgoing(&mut small, &mut traits);
        assert!(!traits.is_compressed);
        assert_eq!(small.num_bits(), 33);
    }

    #[test]
    fn test_oversized_claim_is_error() {
        let mut packet = BitBuffer::new();
        packet.write_bit(true);
        packet.write_packed_u32(1 << 20);
        packet.write_bytes(&[0u8; 8]);
        component(CompressionKind::Lz4).incoming(&mut packet);
        assert!(packet.is_error());
    }

    #[test]
    fn test_garbage_is_error() {
        let mut packet = BitBuffer::new();
        packet.write_bit(true);
        packet.write_packed_u32(64);
        packet.write_bytes(&[0xFF; 8]);
        component(CompressionKind::Zstd).incoming(&mut packet);
        assert!(packet.is_error());
    }
}

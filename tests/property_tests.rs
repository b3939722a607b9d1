//! Property-based tests using proptest
//!
//! These tests check pipeline invariants across randomly generated payloads, bit widths and
//! delivery orders.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_handler::core::{terminated_bit_count, BitBuffer};
use packet_handler::protocol::HandlerComponent;
use packet_handler::utils::compression::{compress, decompress, CompressionKind};
use packet_handler::{
    AesEncryptionComponent, CompressionComponent, HandlerMode, OutgoingPacketTraits,
    PacketHandler, PipelineConfig, ReliabilityComponent,
};
use proptest::prelude::*;

const LARGE_PACKET_BITS: u32 = 65_000 * 8;

fn single_component_handler(component: Box<dyn HandlerComponent>) -> PacketHandler {
    PacketHandler::initialize(HandlerMode::Server, LARGE_PACKET_BITS, vec![component], |_, _, _| {})
        .expect("single component chain should initialise")
}

// Property: mixed-width fields read back exactly as written
proptest! {
    #[test]
    fn prop_bit_fields_read_back(fields in prop::collection::vec((any::<u64>(), 1u32..=64), 0..64)) {
        let mut buffer = BitBuffer::new();
        for &(value, width) in &fields {
            buffer.write_bits(value, width);
        }
        let expected_bits: u32 = fields.iter().map(|&(_, width)| width).sum();
        prop_assert_eq!(buffer.num_bits(), expected_bits as usize);

        let mut reader = BitBuffer::from_bytes(buffer.as_bytes(), buffer.num_bits());
        for &(value, width) in &fields {
            let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
            prop_assert_eq!(reader.read_bits(width).unwrap(), value & mask);
        }
        prop_assert_eq!(reader.remaining_bits(), 0);
    }
}

// Property: packed integers survive any surrounding bit alignment
proptest! {
    #[test]
    fn prop_packed_u32_any_alignment(value in any::<u32>(), lead in 0u32..8) {
        let mut buffer = BitBuffer::new();
        buffer.write_bits(0, lead);
        buffer.write_packed_u32(value);
        prop_assert!(buffer.num_bits() <= (lead + 40) as usize);

        let mut reader = BitBuffer::from_bytes(buffer.as_bytes(), buffer.num_bits());
        reader.read_bits(lead).unwrap();
        prop_assert_eq!(reader.read_packed_u32().unwrap(), value);
    }
}

// Property: the termination bit always recovers the payload length
proptest! {
    #[test]
    fn prop_termination_recovers_length(data in prop::collection::vec(any::<u8>(), 0..256), trim in 0usize..8) {
        let bits = (data.len() * 8).saturating_sub(trim);
        let mut buffer = BitBuffer::from_bytes(&data, bits);
        buffer.write_termination();

        prop_assert_eq!(buffer.as_bytes().len(), bits / 8 + 1);
        prop_assert_eq!(terminated_bit_count(buffer.as_bytes()), Some(bits));
    }
}

// Property: AES packets decrypt to exactly the bits that were sent
proptest! {
    #[test]
    fn prop_aes_round_trip(data in prop::collection::vec(any::<u8>(), 1..1500), key in any::<[u8; 32]>()) {
        let mut sender = single_component_handler(Box::new(AesEncryptionComponent::with_key(key)));
        let mut receiver = single_component_handler(Box::new(AesEncryptionComponent::with_key(key)));
        let bits = data.len() as u32 * 8;

        let wire = sender
            .outgoing(&data, bits, &mut OutgoingPacketTraits::default())
            .data
            .to_vec();
        prop_assert_eq!((wire.len() - 1) % 16, 0);

        let delivered = receiver.incoming(&wire);
        prop_assert!(!delivered.error);
        prop_assert_eq!(delivered.bit_count, bits);
        prop_assert_eq!(&delivered.data[..data.len()], data.as_slice());
    }
}

// Property: the compression component is transparent whether or not it compresses
proptest! {
    #[test]
    fn prop_compression_component_transparent(
        seed in prop::collection::vec(any::<u8>(), 1..64),
        repeats in 1usize..40,
        zstd in any::<bool>(),
    ) {
        let data: Vec<u8> = seed.iter().cycle().take(seed.len() * repeats).copied().collect();
        let kind = if zstd { CompressionKind::Zstd } else { CompressionKind::Lz4 };
        let component = || Box::new(CompressionComponent::new(kind, 3, 16, LARGE_PACKET_BITS));
        let mut sender = single_component_handler(component());
        let mut receiver = single_component_handler(component());
        let bits = data.len() as u32 * 8;

        let mut traits = OutgoingPacketTraits::default();
        let wire = sender.outgoing(&data, bits, &mut traits).data.to_vec();
        if traits.is_compressed {
            prop_assert!(wire.len() < data.len() + 1);
        }

        let delivered = receiver.incoming(&wire);
        prop_assert!(!delivered.error);
        prop_assert_eq!(delivered.bit_count, bits);
        prop_assert_eq!(&delivered.data[..data.len()], data.as_slice());
    }
}

// Property: whatever order packets arrive in, only the next expected id is delivered
proptest! {
    #[test]
    fn prop_reliability_delivers_in_order(order in Just((1u8..=12).collect::<Vec<_>>()).prop_shuffle()) {
        let mut sender = ReliabilityComponent::default();
        sender.initialize(HandlerMode::Client);
        let mut receiver = ReliabilityComponent::default();
        receiver.initialize(HandlerMode::Server);

        let packets: Vec<BitBuffer> = (1u8..=12)
            .map(|id| {
                let mut packet = BitBuffer::new();
                packet.write_bytes(&[id]);
                sender.outgoing(&mut packet, &mut OutgoingPacketTraits::default());
                packet
            })
            .collect();

        let mut delivered = Vec::new();
        for &id in &order {
            let mut packet = packets[usize::from(id) - 1].clone();
            receiver.incoming(&mut packet);
            prop_assert!(!packet.is_error());
            if !packet.is_empty() {
                delivered.push(packet.read_bits(8).unwrap() as u8);
            }
        }

        let expected: Vec<u8> = (1..=delivered.len() as u8).collect();
        prop_assert_eq!(&delivered, &expected);
        prop_assert_eq!(receiver.remote_packet_id(), delivered.len() as u32);
    }
}

// Property: arbitrary datagrams never panic a full server chain
proptest! {
    #[test]
    fn prop_arbitrary_datagrams_rejected_cleanly(data in prop::collection::vec(any::<u8>(), 0..600)) {
        let config = PipelineConfig::default();
        let mut handler = PacketHandler::from_config(HandlerMode::Server, &config, |_, _, _| {}).unwrap();
        let address = "192.0.2.1:5000".parse().unwrap();

        let result = handler.incoming_connectionless(address, &data);
        if data.last().copied().unwrap_or(0) == 0 {
            prop_assert!(result.error);
        }
        let _ = handler.incoming(&data);
    }
}

// Property: LZ4 compression roundtrip preserves data
proptest! {
    #[test]
    fn prop_lz4_compression_roundtrip(data in prop::collection::vec(any::<u8>(), 0..50000)) {
        let compressed = compress(&data, CompressionKind::Lz4, 1).expect("Compression should not fail");
        let decompressed = decompress(&compressed, CompressionKind::Lz4, data.len()).expect("Decompression should not fail");

        prop_assert_eq!(decompressed, data);
    }
}

// Property: Zstd decompression never exceeds the caller's bound
proptest! {
    #[test]
    fn prop_zstd_output_bounded(data in prop::collection::vec(any::<u8>(), 1..20000)) {
        let compressed = compress(&data, CompressionKind::Zstd, 3).expect("Compression should not fail");
        let limit = data.len() / 2;
        if let Ok(out) = decompress(&compressed, CompressionKind::Zstd, limit) {
            prop_assert!(out.len() <= limit);
        }
        prop_assert_eq!(decompress(&compressed, CompressionKind::Zstd, data.len()).unwrap(), data);
    }
}

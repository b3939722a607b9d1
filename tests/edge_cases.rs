#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the packet pipeline
//! Boundary conditions on framing, malformed input at every stage, and oversize handling

use packet_handler::core::{terminated_bit_count, BitBuffer};
use packet_handler::error::HandlerError;
use packet_handler::protocol::handshake::{
    HANDSHAKE_PACKET_SIZE_BITS, RESTART_HANDSHAKE_PACKET_SIZE_BITS, RESTART_RESPONSE_SIZE_BITS,
};
use packet_handler::protocol::HandlerComponent;
use packet_handler::utils::compression::{compress, decompress, maybe_compress, CompressionKind};
use packet_handler::{
    AesEncryptionComponent, CompressionComponent, HandlerMode, OutgoingPacketTraits,
    PacketHandler, PipelineConfig, ReliabilityComponent, StatelessConnectComponent,
};
use std::net::SocketAddr;

fn addr() -> SocketAddr {
    "203.0.113.50:6000".parse().unwrap()
}

fn chain(max_packet_bits: u32, components: Vec<Box<dyn HandlerComponent>>) -> PacketHandler {
    PacketHandler::initialize(HandlerMode::Server, max_packet_bits, components, |_, _, _| {})
        .expect("chain should initialise")
}

/// Terminate `bits` bits of `data` the way the handler does on send
fn terminated(data: &[u8], bits: usize) -> Vec<u8> {
    let mut buffer = BitBuffer::from_bytes(data, bits);
    buffer.write_termination();
    buffer.as_bytes().to_vec()
}

// ============================================================================
// FRAMING EDGE CASES
// ============================================================================

#[test]
fn test_empty_datagram_is_malformed() {
    assert_eq!(terminated_bit_count(&[]), None);
    let mut handler = chain(8192, Vec::new());
    assert!(handler.incoming(&[]).error);
}

#[test]
fn test_zero_final_byte_is_malformed() {
    assert_eq!(terminated_bit_count(&[0xFF, 0x00]), None);
    let mut handler = chain(8192, Vec::new());
    let result = handler.incoming(&[0xFF, 0x00]);
    assert!(result.error);
    assert_eq!(result.bit_count, 0);
}

#[test]
fn test_termination_only_datagram_is_empty_payload() {
    let mut handler = chain(8192, Vec::new());
    let result = handler.incoming(&[0x01]);
    assert!(!result.error);
    assert!(result.is_empty());
}

#[test]
fn test_termination_in_high_bit() {
    // Seven payload bits then the termination bit
    assert_eq!(terminated_bit_count(&[0x80]), Some(7));
    assert_eq!(terminated_bit_count(&[0x12, 0x34, 0x80]), Some(23));
}

#[test]
fn test_outgoing_exactly_at_max_packet_bits() {
    let max_bits = 4608;
    let mut handler = chain(max_bits, Vec::new());
    let payload = vec![0x55u8; 576];

    let fits = handler.outgoing(&payload, max_bits - 1, &mut OutgoingPacketTraits::default());
    assert!(!fits.error);
    assert_eq!(fits.bit_count, max_bits);

    let too_big = handler.outgoing(&payload, max_bits, &mut OutgoingPacketTraits::default());
    assert!(too_big.error);
}

#[test]
fn test_raw_send_bypasses_components() {
    let mut handler = chain(
        8192,
        vec![Box::new(AesEncryptionComponent::with_key([3u8; 32]))],
    );
    handler.set_raw_send(true);
    assert!(handler.is_raw_send());

    let out = handler.outgoing(&[0xAB], 8, &mut OutgoingPacketTraits::default());
    assert_eq!(out.data, &[0xAB, 0x01]);
    assert_eq!(out.bit_count, 9);
}

// ============================================================================
// HANDSHAKE EDGE CASES
// ============================================================================

#[test]
fn test_handshake_sizes() {
    assert_eq!(HANDSHAKE_PACKET_SIZE_BITS, 196);
    assert_eq!(RESTART_HANDSHAKE_PACKET_SIZE_BITS, 2);
    assert_eq!(RESTART_RESPONSE_SIZE_BITS, 356);
}

#[test]
fn test_truncated_handshake_is_error() {
    let mut listener = PacketHandler::from_config(
        HandlerMode::Server,
        &PipelineConfig::default(),
        |_, _, _| {},
    )
    .unwrap();

    // Handshake bit set, then far too few bits for any handshake layout
    let mut short = BitBuffer::new();
    short.write_bit(true);
    short.write_bit(false);
    short.write_bits(0, 10);
    let wire = terminated(short.as_bytes(), short.num_bits());
    assert!(listener.incoming_connectionless(addr(), &wire).error);
}

#[test]
fn test_server_rejects_restart_request_and_acks() {
    let mut listener = PacketHandler::from_config(
        HandlerMode::Server,
        &PipelineConfig::default(),
        |_, _, _| {},
    )
    .unwrap();

    let restart_request = terminated(&[0b11], 2);
    assert!(listener.incoming_connectionless(addr(), &restart_request).error);

    // Ack layout: handshake bit, no restart, secret 0, negative timestamp
    let mut ack = BitBuffer::new();
    ack.write_bit(true);
    ack.write_bit(false);
    ack.write_bits(0, 2);
    ack.write_f32(-1.0);
    ack.write_bytes(&[0u8; 20]);
    let wire = terminated(ack.as_bytes(), ack.num_bits());
    assert!(listener.incoming_connectionless(addr(), &wire).error);
}

#[test]
fn test_non_handshake_connectionless_packet_passes_through() {
    let mut listener = PacketHandler::from_config(
        HandlerMode::Server,
        &PipelineConfig::default(),
        |_, _, _| {},
    )
    .unwrap();

    // Leading 0 bit marks ordinary traffic
    let wire = terminated(&[0b1010_1010], 8);
    let result = listener.incoming_connectionless(addr(), &wire);
    assert!(!result.error);
    assert_eq!(result.bit_count, 7);
}

#[test]
fn test_non_finite_timestamp_rejected() {
    let mut listener = PacketHandler::from_config(
        HandlerMode::Server,
        &PipelineConfig::default(),
        |_, _, _| {},
    )
    .unwrap();
    listener.tick(1.0);

    let mut packet = BitBuffer::new();
    packet.write_bit(true);
    packet.write_bit(false);
    packet.write_bits(0, 2);
    packet.write_f32(f32::NAN);
    packet.write_bytes(&[0xAA; 20]);
    let wire = terminated(packet.as_bytes(), packet.num_bits());
    assert!(listener.incoming_connectionless(addr(), &wire).error);
}

#[test]
fn test_stale_cookie_dropped_silently() {
    let mut listener = PacketHandler::from_config(
        HandlerMode::Server,
        &PipelineConfig::default(),
        |_, _, _| {},
    )
    .unwrap();
    listener.tick(100.0);

    // Timestamp far outside the 40s cookie lifetime
    let mut packet = BitBuffer::new();
    packet.write_bit(true);
    packet.write_bit(false);
    packet.write_bits(0, 2);
    packet.write_f32(1.0);
    packet.write_bytes(&[0xAA; 20]);
    let wire = terminated(packet.as_bytes(), packet.num_bits());
    let result = listener.incoming_connectionless(addr(), &wire);
    assert!(!result.error);
    assert!(result.is_empty());
}

#[test]
fn test_client_handler_drops_connectionless_handshake() {
    let mut client = PacketHandler::initialize(
        HandlerMode::Client,
        8192,
        vec![Box::new(StatelessConnectComponent::default())],
        |_, _, _| {},
    )
    .unwrap();

    let mut packet = BitBuffer::new();
    packet.write_bit(true);
    packet.write_bits(0, 195);
    let wire = terminated(packet.as_bytes(), packet.num_bits());
    let result = client.incoming_connectionless(addr(), &wire);
    assert!(!result.error);
    assert!(result.is_empty());
}

// ============================================================================
// RELIABILITY EDGE CASES
// ============================================================================

#[test]
fn test_reliability_truncated_header() {
    let mut handler = chain(8192, vec![Box::new(ReliabilityComponent::default())]);
    // Continuation bit set with nothing after it
    let wire = terminated(&[0xFF], 8);
    assert!(handler.incoming(&wire).error);
}

#[test]
fn test_reliability_ack_for_unsent_packet() {
    let mut handler = chain(8192, vec![Box::new(ReliabilityComponent::default())]);

    // ack = 5 (never sent), id = 1
    let mut packet = BitBuffer::new();
    packet.write_packed_u32(5);
    packet.write_packed_u32(1);
    let wire = terminated(packet.as_bytes(), packet.num_bits());
    assert!(handler.incoming(&wire).error);
}

#[test]
fn test_reliability_duplicate_dropped_silently() {
    let mut sender = chain(8192, vec![Box::new(ReliabilityComponent::default())]);
    let mut receiver = chain(8192, vec![Box::new(ReliabilityComponent::default())]);

    let wire = sender
        .outgoing(&[0x42], 8, &mut OutgoingPacketTraits::default())
        .data
        .to_vec();
    assert_eq!(receiver.incoming(&wire).bit_count, 8);

    let duplicate = receiver.incoming(&wire);
    assert!(!duplicate.error);
    assert!(duplicate.is_empty());
}

// ============================================================================
// ENCRYPTION EDGE CASES
// ============================================================================

#[test]
fn test_aes_rejects_partial_block() {
    let mut handler = chain(8192, vec![Box::new(AesEncryptionComponent::with_key([9u8; 32]))]);
    let wire = terminated(&[0u8; 15], 120);
    assert!(handler.incoming(&wire).error);
}

#[test]
fn test_aes_wrong_key_never_yields_original_payload() {
    let mut sender = chain(8192, vec![Box::new(AesEncryptionComponent::with_key([1u8; 32]))]);
    let mut receiver = chain(8192, vec![Box::new(AesEncryptionComponent::with_key([2u8; 32]))]);

    let wire = sender
        .outgoing(b"secret", 48, &mut OutgoingPacketTraits::default())
        .data
        .to_vec();
    let result = receiver.incoming(&wire);
    assert!(result.error || result.data.get(..6) != Some(b"secret".as_slice()));
}

#[test]
fn test_aes_key_must_be_32_bytes() {
    let mut component = AesEncryptionComponent::new();
    assert!(matches!(
        component.set_encryption_key(&[0u8; 16]),
        Err(HandlerError::CryptoError(_))
    ));
    assert!(!component.has_key());
    component.set_encryption_key(&[0u8; 32]).unwrap();
    assert!(component.has_key());
    assert!(!component.is_encryption_enabled());
    component.enable_encryption();
    assert!(component.is_encryption_enabled());
}

#[test]
fn test_aes_disabled_is_passthrough() {
    let mut component = AesEncryptionComponent::with_key([4u8; 32]);
    component.disable_encryption();
    let mut handler = chain(8192, vec![Box::new(component)]);

    let out = handler.outgoing(&[0xC3], 8, &mut OutgoingPacketTraits::default());
    assert_eq!(out.data, &[0xC3, 0x01]);
}

// ============================================================================
// COMPRESSION EDGE CASES
// ============================================================================

#[test]
fn test_compression_empty_data() {
    let compressed = compress(&[], CompressionKind::Lz4, 1).unwrap();
    let decompressed = decompress(&compressed, CompressionKind::Lz4, 0).unwrap();
    assert!(decompressed.is_empty());
}

#[test]
fn test_decompression_corrupted_data_lz4() {
    let mut corrupted = compress(&vec![7u8; 1000], CompressionKind::Lz4, 1).unwrap();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    corrupted.truncate(last);
    assert!(decompress(&corrupted, CompressionKind::Lz4, 1000).is_err());
}

#[test]
fn test_lz4_claimed_size_above_limit() {
    let compressed = compress(&vec![0u8; 4096], CompressionKind::Lz4, 1).unwrap();
    assert!(matches!(
        decompress(&compressed, CompressionKind::Lz4, 1024),
        Err(HandlerError::DecompressionFailure)
    ));
}

#[test]
fn test_maybe_compress_below_threshold() {
    let data = vec![0u8; 64];
    assert_eq!(maybe_compress(&data, CompressionKind::Lz4, 1, 128).unwrap(), None);
    assert!(maybe_compress(&vec![0u8; 512], CompressionKind::Lz4, 1, 128)
        .unwrap()
        .is_some());
}

#[test]
fn test_compression_component_respects_traits() {
    let mut handler = chain(
        8192 * 4,
        vec![Box::new(CompressionComponent::new(CompressionKind::Lz4, 1, 16, 8192 * 4))],
    );
    let data = vec![0u8; 1024];

    let mut traits = OutgoingPacketTraits {
        allow_compression: false,
        ..OutgoingPacketTraits::default()
    };
    let out = handler.outgoing(&data, 8192, &mut traits);
    assert!(!traits.is_compressed);
    assert_eq!(out.bit_count, 8192 + 1 + 1);

    let mut traits = OutgoingPacketTraits::default();
    let out = handler.outgoing(&data, 8192, &mut traits);
    assert!(traits.is_compressed);
    assert!(out.bit_count < 8192);
}

#[test]
fn test_compression_bomb_rejected() {
    let mut handler = chain(
        8192,
        vec![Box::new(CompressionComponent::new(CompressionKind::Lz4, 1, 16, 8192))],
    );
    let bomb = compress(&vec![0u8; 1 << 20], CompressionKind::Lz4, 1).unwrap();

    // Flag, packed bit count claiming 64 bits, then the oversized stream
    let mut packet = BitBuffer::new();
    packet.write_bit(true);
    packet.write_packed_u32(64);
    packet.write_bytes(&bomb);
    let wire = terminated(packet.as_bytes(), packet.num_bits());
    assert!(handler.incoming(&wire).error);
}

// ============================================================================
// ERROR PROPAGATION EDGE CASES
// ============================================================================

#[test]
fn test_error_display_formatting() {
    let errors = vec![
        HandlerError::MalformedPacket("bad header".into()),
        HandlerError::ConfigError("bad config".into()),
        HandlerError::CryptoError("bad key".into()),
        HandlerError::InvalidState("too late".into()),
        HandlerError::DecompressionFailure,
    ];

    for err in errors {
        let display = format!("{err}");
        assert!(!display.is_empty());
    }
}

//! # Packet Handler
//!
//! Runs datagrams through an ordered chain of [`HandlerComponent`]s.
//!
//! ## Ordering
//! - Outgoing packets visit components in registration order, incoming packets in reverse, so
//!   the last registered component is the outermost layer on the wire.
//! - Packets a component originates (handshake control traffic, reliability resends) are
//!   processed only by the components registered *after* it, or by none when sent raw.
//!
//! ## Lifecycle
//! ```text
//! Uninitialized ──initialize_components()──▶ InitializingComponents ──all ready──▶ Initialized
//! ```
//! Outgoing packets submitted before `Initialized` are buffered and replayed through the full
//! chain, in order, the moment initialisation completes.
//!
//! ## Framing
//! Every datagram the handler emits ends with a `1` termination bit and zero padding to the
//! byte boundary; every datagram it accepts must end that way.

use crate::config::PipelineConfig;
use crate::config::{ComponentKind, ReliabilityConfig, DEFAULT_MAX_BUFFERED_PACKETS};
use crate::core::{
    terminated_bit_count, BitBuffer, BufferedPacket, ComponentId, OutgoingPacketTraits,
    ProcessedPacket,
};
use crate::error::{constants, HandlerError, Result};
use crate::protocol::component::{
    ComponentState, HandlerComponent, HandlerMode, HandlerState, LowLevelSendFn,
};
use crate::protocol::compression::CompressionComponent;
use crate::protocol::encryption::AesEncryptionComponent;
use crate::protocol::handshake::StatelessConnectComponent;
use crate::protocol::reliability::ReliabilityComponent;
use crate::utils::metrics::{global_metrics, Timer};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Orchestrates a chain of packet components for one connection (or for a server's
/// connectionless traffic).
pub struct PacketHandler {
    mode: HandlerMode,
    state: HandlerState,
    max_packet_bits: u32,
    components: Vec<Box<dyn HandlerComponent>>,
    low_level_send: LowLevelSendFn,
    /// Resend resolution for an automatically added reliability component
    reliability_resend_resolution: Duration,
    raw_send: bool,
    /// Handler clock in seconds, advanced by `tick`
    elapsed: f64,
    /// Outgoing packets submitted before initialisation completed
    buffered_packets: VecDeque<BufferedPacket>,
    max_buffered_packets: usize,
    incoming_packet: BitBuffer,
    incoming_output: Vec<u8>,
    outgoing_output: BitBuffer,
}

impl std::fmt::Debug for PacketHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHandler")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("max_packet_bits", &self.max_packet_bits)
            .field(
                "components",
                &self.components.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("buffered_packets", &self.buffered_packets.len())
            .finish_non_exhaustive()
    }
}

impl PacketHandler {
    /// Create an empty handler. Add components, then call
    /// [`initialize_components`](Self::initialize_components).
    pub fn new<F>(mode: HandlerMode, max_packet_bits: u32, low_level_send: F) -> Self
    where
        F: FnMut(&[u8], u32, Option<SocketAddr>) + Send + 'static,
    {
        Self {
            mode,
            state: HandlerState::Uninitialized,
            max_packet_bits,
            components: Vec::new(),
            low_level_send: Box::new(low_level_send),
            reliability_resend_resolution: ReliabilityConfig::default().resend_resolution_time,
            raw_send: false,
            elapsed: 0.0,
            buffered_packets: VecDeque::new(),
            max_buffered_packets: DEFAULT_MAX_BUFFERED_PACKETS,
            incoming_packet: BitBuffer::new(),
            incoming_output: Vec::new(),
            outgoing_output: BitBuffer::new(),
        }
    }

    /// Build and initialise a handler in one step
    pub fn initialize<F>(
        mode: HandlerMode,
        max_packet_bits: u32,
        components: Vec<Box<dyn HandlerComponent>>,
        low_level_send: F,
    ) -> Result<Self>
    where
        F: FnMut(&[u8], u32, Option<SocketAddr>) + Send + 'static,
    {
        let mut handler = Self::new(mode, max_packet_bits, low_level_send);
        for component in components {
            handler.add_component(component)?;
        }
        handler.initialize_components()?;
        Ok(handler)
    }

    /// Build the chain described by `config` and initialise it
    #[instrument(skip(config, low_level_send))]
    pub fn from_config<F>(mode: HandlerMode, config: &PipelineConfig, low_level_send: F) -> Result<Self>
    where
        F: FnMut(&[u8], u32, Option<SocketAddr>) + Send + 'static,
    {
        config.validate_strict()?;

        let mut handler = Self::new(mode, config.handler.max_packet_bits, low_level_send);
        handler.reliability_resend_resolution = config.reliability.resend_resolution_time;
        handler.set_max_buffered_packets(config.handler.max_buffered_packets);

        for kind in &config.handler.components {
            let component: Box<dyn HandlerComponent> = match kind {
                ComponentKind::StatelessConnect => {
                    Box::new(StatelessConnectComponent::new(&config.handshake))
                }
                ComponentKind::Reliability => Box::new(ReliabilityComponent::new(&config.reliability)),
                ComponentKind::Encryption => {
                    Box::new(AesEncryptionComponent::from_config(&config.encryption)?)
                }
                ComponentKind::Compression => Box::new(CompressionComponent::from_config(
                    &config.compression,
                    config.handler.max_packet_bits,
                )),
            };
            handler.add_component(component)?;
        }

        handler.initialize_components()?;
        Ok(handler)
    }

    /// Append a component to the chain.
    ///
    /// # Errors
    /// `InvalidState` once initialisation has started.
    pub fn add_component(&mut self, component: Box<dyn HandlerComponent>) -> Result<ComponentId> {
        if self.state != HandlerState::Uninitialized {
            return Err(HandlerError::InvalidState(
                constants::ERR_COMPONENT_AFTER_INIT.into(),
            ));
        }
        debug!(component = component.name(), "Adding handler component");
        self.components.push(component);
        Ok(ComponentId(self.components.len() - 1))
    }

    /// Validate the chain, initialise every component and start handshaking.
    ///
    /// # Errors
    /// `ConfigError` if a component is misconfigured or the reserved bits do not fit in
    /// `max_packet_bits`; `InvalidState` if called twice.
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub fn initialize_components(&mut self) -> Result<()> {
        let _timer = Timer::start("initialize_components");

        if self.state != HandlerState::Uninitialized {
            return Err(HandlerError::InvalidState(
                constants::ERR_ALREADY_INITIALIZED.into(),
            ));
        }

        let needs_reliability = self.components.iter().any(|c| c.requires_reliability());
        let has_reliability = self.component::<ReliabilityComponent>().is_some();
        if needs_reliability && !has_reliability {
            debug!("Adding reliability component required by the chain");
            self.components.insert(
                0,
                Box::new(ReliabilityComponent::with_resend_resolution(
                    self.reliability_resend_resolution,
                )),
            );
        }

        if let Some(invalid) = self.components.iter().find(|c| !c.is_valid()) {
            let message = if invalid.as_any().is::<AesEncryptionComponent>() {
                constants::ERR_MISSING_ENCRYPTION_KEY.to_string()
            } else {
                format!("Component '{}' is not validly configured", invalid.name())
            };
            return Err(HandlerError::ConfigError(message));
        }

        let reserved = self.total_reserved_packet_bits();
        if reserved >= self.max_packet_bits {
            return Err(HandlerError::ConfigError(format!(
                "{}: {} reserved, {} available",
                constants::ERR_RESERVED_BITS,
                reserved,
                self.max_packet_bits
            )));
        }

        self.state = HandlerState::InitializingComponents;
        let mode = self.mode;
        for component in self.components.iter_mut() {
            component.initialize(mode);
        }
        for component in self.components.iter_mut() {
            if component.requires_handshake() {
                component.begin_handshaking();
            }
        }

        info!(
            components = self.components.len(),
            reserved_bits = reserved,
            "Packet handler components initialized"
        );
        self.after_entry_point();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Packet paths
    // ------------------------------------------------------------------

    /// Process a datagram received on this handler's connection.
    pub fn incoming(&mut self, data: &[u8]) -> ProcessedPacket<'_> {
        self.process_incoming(None, data)
    }

    /// Process a datagram from an address with no connection yet
    pub fn incoming_connectionless(&mut self, address: SocketAddr, data: &[u8]) -> ProcessedPacket<'_> {
        self.process_incoming(Some(address), data)
    }

    /// Process an outgoing connection packet of `bit_count` bits.
    ///
    /// Before initialisation completes the packet is buffered and an empty result returned.
    pub fn outgoing(
        &mut self,
        data: &[u8],
        bit_count: u32,
        traits: &mut OutgoingPacketTraits,
    ) -> ProcessedPacket<'_> {
        if !self.raw_send && self.state != HandlerState::Initialized {
            trace!(bit_count, "Buffering outgoing packet until initialized");
            if self.buffered_packets.len() >= self.max_buffered_packets {
                self.buffered_packets.pop_front();
                warn!(
                    max = self.max_buffered_packets,
                    "Pre-initialization buffer full, dropping oldest packet"
                );
            }
            self.buffered_packets
                .push_back(BufferedPacket::new(data, bit_count, *traits));
            global_metrics().packet_buffered();
            return ProcessedPacket::empty();
        }
        self.process_outgoing(None, data, bit_count, traits)
    }

    /// Process an outgoing packet for an address with no connection. Never buffered.
    pub fn outgoing_connectionless(
        &mut self,
        address: SocketAddr,
        data: &[u8],
        bit_count: u32,
        traits: &mut OutgoingPacketTraits,
    ) -> ProcessedPacket<'_> {
        self.process_outgoing(Some(address), data, bit_count, traits)
    }

    fn process_incoming(&mut self, address: Option<SocketAddr>, data: &[u8]) -> ProcessedPacket<'_> {
        global_metrics().packet_received(data.len() as u64);

        let Some(bit_count) = terminated_bit_count(data) else {
            debug!(len = data.len(), "Datagram without termination bit");
            global_metrics().hard_error();
            return ProcessedPacket::failed();
        };
        self.incoming_packet = BitBuffer::from_bytes(data, bit_count);

        if self.state != HandlerState::Uninitialized {
            for component in self.components.iter_mut().rev() {
                if !component.is_active() {
                    continue;
                }
                match address {
                    Some(address) => component.incoming_connectionless(address, &mut self.incoming_packet),
                    None => component.incoming(&mut self.incoming_packet),
                }
                if self.incoming_packet.is_error() || self.incoming_packet.is_empty() {
                    break;
                }
            }
        }

        let error = self.incoming_packet.is_error();
        let bits = if error {
            self.incoming_output.clear();
            0
        } else {
            self.incoming_packet.copy_remaining_into(&mut self.incoming_output)
        };

        self.after_entry_point();

        if error {
            global_metrics().hard_error();
            ProcessedPacket::failed()
        } else {
            if bits == 0 {
                global_metrics().silent_drop();
            }
            ProcessedPacket::new(&self.incoming_output, bits as u32)
        }
    }

    fn process_outgoing(
        &mut self,
        address: Option<SocketAddr>,
        data: &[u8],
        bit_count: u32,
        traits: &mut OutgoingPacketTraits,
    ) -> ProcessedPacket<'_> {
        let mut packet = BitBuffer::from_bytes(data, bit_count as usize);
        if !self.raw_send {
            run_outgoing(&mut self.components, &mut packet, traits, address);
        }
        let fits = finish_outgoing(&mut packet, self.max_packet_bits);
        self.outgoing_output = packet;

        self.after_entry_point();

        if !fits {
            warn!(
                bits = self.outgoing_output.num_bits(),
                max = self.max_packet_bits,
                "Outgoing packet exceeds max_packet_bits"
            );
            return ProcessedPacket::failed();
        }
        ProcessedPacket::new(
            self.outgoing_output.as_bytes(),
            self.outgoing_output.num_bits() as u32,
        )
    }

    /// Advance time by `delta_time` seconds for the handler and every component
    pub fn tick(&mut self, delta_time: f32) {
        self.elapsed += f64::from(delta_time.max(0.0));
        for component in self.components.iter_mut() {
            component.tick(delta_time);
        }
        self.after_entry_point();
    }

    // ------------------------------------------------------------------
    // Handler-originated sends
    // ------------------------------------------------------------------

    /// Send every packet components have queued
    pub fn flush_handler_packets(&mut self) {
        loop {
            let mut sent_any = false;
            for index in 0..self.components.len() {
                while let Some(mut packet) = self.components[index].poll_handler_packet() {
                    if !packet.raw_send && packet.origin_component.is_none() {
                        packet.origin_component = Some(ComponentId(index));
                    }
                    self.send_handler_packet(packet);
                    sent_any = true;
                }
            }
            if !sent_any {
                break;
            }
        }
    }

    fn send_handler_packet(&mut self, packet: BufferedPacket) {
        let mut buffer = BitBuffer::from_bytes(&packet.data, packet.bit_count as usize);
        let mut traits = packet.traits;

        let previous_raw_send = self.raw_send;
        if packet.raw_send {
            self.set_raw_send(true);
        } else {
            let start = packet.origin_component.map_or(0, |id| id.0 + 1);
            if let Some(after_origin) = self.components.get_mut(start..) {
                run_outgoing(after_origin, &mut buffer, &mut traits, packet.destination_address);
            }
        }

        self.send_low_level(buffer, packet.destination_address);
        self.set_raw_send(previous_raw_send);
    }

    fn send_low_level(&mut self, mut packet: BitBuffer, address: Option<SocketAddr>) {
        if !finish_outgoing(&mut packet, self.max_packet_bits) {
            warn!(bits = packet.num_bits(), "Dropping oversized handler packet");
            return;
        }
        global_metrics().packet_sent(packet.as_bytes().len() as u64);
        (self.low_level_send)(packet.as_bytes(), packet.num_bits() as u32, address);
    }

    fn replay_buffered_packets(&mut self) {
        if !self.buffered_packets.is_empty() {
            debug!(count = self.buffered_packets.len(), "Sending packets buffered before initialization");
        }
        while let Some(buffered) = self.buffered_packets.pop_front() {
            let mut packet = BitBuffer::from_bytes(&buffered.data, buffered.bit_count as usize);
            let mut traits = buffered.traits;
            run_outgoing(&mut self.components, &mut packet, &mut traits, None);
            self.send_low_level(packet, None);
        }
    }

    /// Drain component packets and complete initialisation once every component is ready
    fn after_entry_point(&mut self) {
        self.flush_handler_packets();

        if self.state == HandlerState::InitializingComponents
            && self
                .components
                .iter()
                .all(|c| c.state() == ComponentState::Initialized)
        {
            self.state = HandlerState::Initialized;
            info!(mode = ?self.mode, "Packet handler fully initialized");
            self.replay_buffered_packets();
            self.flush_handler_packets();
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Bypass the component chain for subsequent outgoing packets
    pub fn set_raw_send(&mut self, raw_send: bool) {
        self.raw_send = raw_send;
    }

    pub fn is_raw_send(&self) -> bool {
        self.raw_send
    }

    /// Worst-case bits the chain adds to a packet, including the termination bit
    pub fn total_reserved_packet_bits(&self) -> u32 {
        self.components
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.reserved_packet_bits())
            .sum::<u32>()
            + 1
    }

    pub fn is_fully_initialized(&self) -> bool {
        self.state == HandlerState::Initialized
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn mode(&self) -> HandlerMode {
        self.mode
    }

    pub fn max_packet_bits(&self) -> u32 {
        self.max_packet_bits
    }

    /// Seconds of handler time elapsed through `tick`
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Cap the packets held before initialisation. At least one packet is always kept.
    pub fn set_max_buffered_packets(&mut self, max: usize) {
        self.max_buffered_packets = max.max(1);
        while self.buffered_packets.len() > self.max_buffered_packets {
            self.buffered_packets.pop_front();
        }
    }

    /// Outgoing packets waiting for initialisation to complete
    pub fn buffered_packet_count(&self) -> usize {
        self.buffered_packets.len()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// First component of type `T`
    pub fn component<T: HandlerComponent>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<T>())
    }

    /// First component of type `T`, mutably. Packets it queues are sent on the next entry
    /// point or [`flush_handler_packets`](Self::flush_handler_packets).
    pub fn component_mut<T: HandlerComponent>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }
}

fn run_outgoing(
    components: &mut [Box<dyn HandlerComponent>],
    packet: &mut BitBuffer,
    traits: &mut OutgoingPacketTraits,
    address: Option<SocketAddr>,
) {
    for component in components.iter_mut().filter(|c| c.is_active()) {
        match address {
            Some(address) => component.outgoing_connectionless(address, packet, traits),
            None => component.outgoing(packet, traits),
        }
    }
}

/// Append the termination bit. Returns false if the result exceeds `max_packet_bits`.
fn finish_outgoing(packet: &mut BitBuffer, max_packet_bits: u32) -> bool {
    packet.compact();
    packet.write_termination();
    packet.num_bits() <= max_packet_bits as usize
}

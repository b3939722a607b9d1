//! The capability trait every pipeline stage implements, plus the state enums shared by the
//! handler and its components.

use crate::core::{BitBuffer, BufferedPacket, OutgoingPacketTraits};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::SocketAddr;

/// Which side of a connection a handler serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerMode {
    Client,
    Server,
}

/// Lifecycle of the handler as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerState {
    Uninitialized,
    InitializingComponents,
    Initialized,
}

/// Lifecycle of a single component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentState {
    Uninitialized,
    /// Local side is configured, waiting on the remote
    LocalReady,
    /// Remote side has answered, local side still finishing
    RemoteReady,
    Initialized,
}

/// Socket-level send sink: `(bytes, bit_count, destination)`.
///
/// `destination` is `Some` only for connectionless sends.
pub type LowLevelSendFn = Box<dyn FnMut(&[u8], u32, Option<SocketAddr>) + Send>;

/// A stage in the packet pipeline.
///
/// Outgoing packets pass through components in registration order, incoming packets in reverse.
/// A component consumes its own header from the read cursor of an incoming [`BitBuffer`] and
/// leaves the rest for the next stage. Packet paths never return errors: a corrupt packet is
/// flagged with [`BitBuffer::set_error`], expected noise is discarded with
/// [`BitBuffer::drop_silently`].
pub trait HandlerComponent: Any + Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn state(&self) -> ComponentState;

    /// Structural initialisation, called once from `PacketHandler::initialize_components`
    fn initialize(&mut self, mode: HandlerMode);

    /// Start any remote exchange. Only called when [`requires_handshake`](Self::requires_handshake)
    /// is true.
    fn begin_handshaking(&mut self) {}

    /// Unwrap an incoming connection packet
    fn incoming(&mut self, packet: &mut BitBuffer);

    /// Wrap an outgoing connection packet
    fn outgoing(&mut self, packet: &mut BitBuffer, traits: &mut OutgoingPacketTraits);

    fn incoming_connectionless(&mut self, _address: SocketAddr, _packet: &mut BitBuffer) {}

    fn outgoing_connectionless(
        &mut self,
        _address: SocketAddr,
        _packet: &mut BitBuffer,
        _traits: &mut OutgoingPacketTraits,
    ) {
    }

    /// Advance the component clock by `delta_time` seconds
    fn tick(&mut self, _delta_time: f32) {}

    /// Inactive components are skipped on both paths
    fn is_active(&self) -> bool {
        true
    }

    /// Configuration check run before initialisation
    fn is_valid(&self) -> bool;

    /// Worst-case number of bits this component adds to an outgoing packet
    fn reserved_packet_bits(&self) -> u32;

    fn requires_handshake(&self) -> bool {
        false
    }

    fn requires_reliability(&self) -> bool {
        false
    }

    /// Next packet this component wants sent. Drained by the handler after every entry point.
    fn poll_handler_packet(&mut self) -> Option<BufferedPacket> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

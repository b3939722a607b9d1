//! # Stateless Connect Handshake
//!
//! Anti-spoofing cookie exchange that authenticates a remote address before the server
//! allocates anything for it.
//!
//! ## Flow
//! ```text
//! client                                    server
//!   InitialConnect  (timestamp 0.0)  ──────▶
//!                                   ◀──────  Challenge  {secret_id, timestamp, cookie}
//!   ChallengeResponse (echo)         ──────▶  recompute cookie, compare
//!                                   ◀──────  ChallengeAck {timestamp -1.0, cookie}
//! ```
//! The server keeps no per-attempt state: the cookie is an HMAC of the timestamp and client
//! address under one of two rotating secrets, so the echoed response carries everything needed
//! to verify it.
//!
//! ## Wire Format
//! ```text
//! [handshake: 1][restart: 1][secret_id: 2][timestamp: f32][cookie: 160][original cookie: 160]?
//! ```
//! Every non-handshake packet carries a single leading `0` bit. The InitialConnect is padded to
//! the full handshake size so a challenge never amplifies the traffic that triggered it. A
//! restart request is just the two header bits; the original cookie is only present in a
//! restarted challenge response.
//!
//! ## Restarts
//! When a client's address changes (NAT rebinding), the server cannot match its packets to a
//! connection and asks it to restart. The client repeats the exchange with its authorised cookie
//! attached, letting the server find and rebind the existing connection.

use crate::config::HandshakeConfig;
use crate::core::{BitBuffer, BufferedPacket, OutgoingPacketTraits};
use crate::error::{constants, HandlerError, Result};
use crate::protocol::component::{ComponentState, HandlerComponent, HandlerMode};
use crate::utils::metrics::global_metrics;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::any::Any;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info, instrument, trace, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a full handshake packet: header bits, secret id, timestamp and cookie
pub const HANDSHAKE_PACKET_SIZE_BITS: usize = 1 + 1 + 2 + 32 + COOKIE_BYTE_SIZE * 8;

/// Size of a server's restart request: the handshake and restart bits
pub const RESTART_HANDSHAKE_PACKET_SIZE_BITS: usize = 2;

/// Size of a restarted challenge response, which also carries the original cookie
pub const RESTART_RESPONSE_SIZE_BITS: usize = HANDSHAKE_PACKET_SIZE_BITS + COOKIE_BYTE_SIZE * 8;

pub const COOKIE_BYTE_SIZE: usize = 20;
pub const SECRET_BYTE_SIZE: usize = 64;
const SECRET_COUNT: usize = 2;

const ACK_TIMESTAMP: f32 = -1.0;

pub type Cookie = [u8; COOKIE_BYTE_SIZE];

type HmacSha256 = Hmac<Sha256>;

/// Derive the initial `(server, client)` packet sequences both peers agree on from a cookie
pub fn sequences_from_cookie(cookie: &Cookie) -> (u16, u16) {
    let server = u16::from_le_bytes([cookie[0], cookie[1]]) & 0x3FFF;
    let client = u16::from_le_bytes([cookie[2], cookie[3]]) & 0x3FFF;
    (server, client)
}

/// Outcome of the last successful challenge on a server's connectionless component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChallengeSuccess {
    pub address: SocketAddr,
    /// The response was a restarted handshake
    pub restarted: bool,
    pub cookie: Cookie,
    /// Authorised cookie of the connection being restarted
    pub original_cookie: Option<Cookie>,
    pub server_sequence: u16,
    pub client_sequence: u16,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct HandshakeSecrets([[u8; SECRET_BYTE_SIZE]; SECRET_COUNT]);

#[derive(Debug, Clone, Copy, PartialEq)]
struct HandshakeFields {
    restart: bool,
    secret_id: u8,
    timestamp: f32,
    cookie: Cookie,
    original_cookie: Option<Cookie>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParsedHandshake {
    RestartRequest,
    Packet(HandshakeFields),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CookieCheck {
    Valid,
    /// Out of its lifetime or minted by a secret that has since been replaced
    Expired,
    Mismatch,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parse a handshake packet whose leading handshake bit has already been consumed
fn parse_handshake(packet: &mut BitBuffer) -> Result<ParsedHandshake> {
    let total_bits = packet.remaining_bits() + 1;
    let restart = packet.read_bit()?;

    if restart && total_bits == RESTART_HANDSHAKE_PACKET_SIZE_BITS {
        return Ok(ParsedHandshake::RestartRequest);
    }
    if total_bits != HANDSHAKE_PACKET_SIZE_BITS
        && !(restart && total_bits == RESTART_RESPONSE_SIZE_BITS)
    {
        return Err(HandlerError::MalformedPacket(format!(
            "Handshake packet of {total_bits} bits"
        )));
    }

    let secret_id = packet.read_bits(2)? as u8;
    let timestamp = packet.read_f32()?;
    let mut cookie = [0u8; COOKIE_BYTE_SIZE];
    packet.read_bytes(&mut cookie)?;
    let original_cookie = if total_bits == RESTART_RESPONSE_SIZE_BITS {
        let mut original = [0u8; COOKIE_BYTE_SIZE];
        packet.read_bytes(&mut original)?;
        Some(original)
    } else {
        None
    };

    if !timestamp.is_finite() || usize::from(secret_id) >= SECRET_COUNT {
        return Err(HandlerError::MalformedPacket(
            "Handshake secret id or timestamp out of range".into(),
        ));
    }

    Ok(ParsedHandshake::Packet(HandshakeFields {
        restart,
        secret_id,
        timestamp,
        cookie,
        original_cookie,
    }))
}

fn handshake_packet(fields: &HandshakeFields) -> BitBuffer {
    let mut packet = BitBuffer::with_capacity_bits(RESTART_RESPONSE_SIZE_BITS);
    packet.write_bit(true);
    packet.write_bit(fields.restart);
    packet.write_bits(u64::from(fields.secret_id), 2);
    packet.write_f32(fields.timestamp);
    packet.write_bytes(&fields.cookie);
    if let Some(original) = fields.original_cookie {
        packet.write_bytes(&original);
    }
    packet
}

/// Stateless handshake component.
///
/// One instance lives on the server's connectionless handler and answers challenges for every
/// address. Each connection (client side, and server side once a challenge succeeds) has its own
/// connection-bound instance.
pub struct StatelessConnectComponent {
    state: ComponentState,
    mode: Option<HandlerMode>,

    secret_update_time: f32,
    secret_update_time_variance: f32,
    max_cookie_lifetime: f32,
    handshake_resend_interval: f32,

    /// Component clock in seconds, advanced by `tick`
    elapsed: f64,

    // Server
    secrets: HandshakeSecrets,
    active_secret: u8,
    last_secret_update_timestamp: f32,
    /// Rotation time before the last one; the inactive secret issued cookies between the two
    previous_secret_update_timestamp: f32,
    next_secret_update_interval: f32,
    last_challenge_success: Option<ChallengeSuccess>,

    // Connection-bound
    authorised_cookie: Cookie,
    restarted_handshake: bool,
    last_secret_id: u8,
    last_timestamp: f32,
    last_cookie: Cookie,
    last_client_send_time: f64,
    last_server_sequence: u16,
    last_client_sequence: u16,

    outbox: VecDeque<BufferedPacket>,
}

impl std::fmt::Debug for StatelessConnectComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessConnectComponent")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("active_secret", &self.active_secret)
            .field("restarted_handshake", &self.restarted_handshake)
            .finish_non_exhaustive()
    }
}

impl StatelessConnectComponent {
    pub fn new(config: &HandshakeConfig) -> Self {
        Self {
            state: ComponentState::Uninitialized,
            mode: None,
            secret_update_time: config.secret_update_time.as_secs_f32(),
            secret_update_time_variance: config.secret_update_time_variance.as_secs_f32(),
            max_cookie_lifetime: config.max_cookie_lifetime().as_secs_f32(),
            handshake_resend_interval: config.handshake_resend_interval.as_secs_f32(),
            elapsed: 0.0,
            secrets: HandshakeSecrets([[0u8; SECRET_BYTE_SIZE]; SECRET_COUNT]),
            active_secret: 0,
            last_secret_update_timestamp: 0.0,
            previous_secret_update_timestamp: 0.0,
            next_secret_update_interval: config.secret_update_time.as_secs_f32(),
            last_challenge_success: None,
            authorised_cookie: [0u8; COOKIE_BYTE_SIZE],
            restarted_handshake: false,
            last_secret_id: 0,
            last_timestamp: 0.0,
            last_cookie: [0u8; COOKIE_BYTE_SIZE],
            last_client_send_time: 0.0,
            last_server_sequence: 0,
            last_client_sequence: 0,
            outbox: VecDeque::new(),
        }
    }

    fn is_server(&self) -> bool {
        self.mode == Some(HandlerMode::Server)
    }

    /// Timestamp stamped on a new challenge. Strictly positive so it never reads as an
    /// InitialConnect.
    fn challenge_timestamp(&self) -> f32 {
        (self.elapsed as f32).max(f32::MIN_POSITIVE)
    }

    fn queue_raw(&mut self, packet: BitBuffer, address: Option<SocketAddr>) {
        self.outbox.push_back(BufferedPacket::raw(
            packet.as_bytes(),
            packet.num_bits() as u32,
            address,
        ));
    }

    // ------------------------------------------------------------------
    // Secrets and cookies
    // ------------------------------------------------------------------

    /// Rotate the inactive secret in and refresh it with random bytes
    #[instrument(skip(self))]
    pub fn update_secret(&mut self) {
        let mut rng = rand::rng();

        self.previous_secret_update_timestamp = self.last_secret_update_timestamp;
        self.last_secret_update_timestamp = self.elapsed as f32;
        self.active_secret = (self.active_secret + 1) % SECRET_COUNT as u8;
        rng.fill(&mut self.secrets.0[usize::from(self.active_secret)][..]);

        let variance = self.secret_update_time_variance;
        let jitter = if variance > 0.0 {
            rng.random_range(-variance..=variance)
        } else {
            0.0
        };
        self.next_secret_update_interval = (self.secret_update_time + jitter).max(0.0);
        debug!(
            active_secret = self.active_secret,
            next_update = self.next_secret_update_interval,
            "Rotated handshake secret"
        );
    }

    pub fn active_secret(&self) -> u8 {
        self.active_secret
    }

    fn generate_cookie(&self, secret_id: u8, timestamp: f32, address: &SocketAddr) -> Result<Cookie> {
        let secret = &self.secrets.0[usize::from(secret_id) % SECRET_COUNT];
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|_| HandlerError::CryptoError(constants::ERR_MAC_INIT.into()))?;
        mac.update(&timestamp.to_le_bytes());
        match address.ip() {
            IpAddr::V4(ip) => mac.update(&ip.octets()),
            IpAddr::V6(ip) => mac.update(&ip.octets()),
        }
        mac.update(&address.port().to_le_bytes());

        let digest = mac.finalize().into_bytes();
        let mut cookie = [0u8; COOKIE_BYTE_SIZE];
        cookie.copy_from_slice(&digest[..COOKIE_BYTE_SIZE]);
        Ok(cookie)
    }

    fn check_cookie(&self, address: &SocketAddr, fields: &HandshakeFields) -> CookieCheck {
        let now = self.elapsed as f32;
        let cookie_age = now - fields.timestamp;
        let in_epoch = if fields.secret_id == self.active_secret {
            fields.timestamp >= self.last_secret_update_timestamp
        } else {
            (self.previous_secret_update_timestamp..=self.last_secret_update_timestamp)
                .contains(&fields.timestamp)
        };

        if !(0.0..self.max_cookie_lifetime).contains(&cookie_age) || !in_epoch {
            return CookieCheck::Expired;
        }

        match self.generate_cookie(fields.secret_id, fields.timestamp, address) {
            Ok(expected) if constant_time_eq(&expected, &fields.cookie) => CookieCheck::Valid,
            Ok(_) => CookieCheck::Mismatch,
            Err(e) => {
                warn!(error = %e, "Failed to regenerate handshake cookie");
                CookieCheck::Mismatch
            }
        }
    }

    // ------------------------------------------------------------------
    // Server: connectionless
    // ------------------------------------------------------------------

    fn send_connect_challenge(&mut self, address: SocketAddr) {
        let timestamp = self.challenge_timestamp();
        let cookie = match self.generate_cookie(self.active_secret, timestamp, &address) {
            Ok(cookie) => cookie,
            Err(e) => {
                warn!(error = %e, %address, "Unable to issue handshake challenge");
                return;
            }
        };
        trace!(%address, timestamp, "Sending handshake challenge");
        let packet = handshake_packet(&HandshakeFields {
            restart: false,
            secret_id: self.active_secret,
            timestamp,
            cookie,
            original_cookie: None,
        });
        self.queue_raw(packet, Some(address));
    }

    /// Acknowledge a completed challenge. `address` is `None` on a connection-bound component.
    pub fn send_challenge_ack(&mut self, address: Option<SocketAddr>, cookie: Cookie) {
        trace!(?address, "Sending handshake ack");
        let packet = handshake_packet(&HandshakeFields {
            restart: false,
            secret_id: 0,
            timestamp: ACK_TIMESTAMP,
            cookie,
            original_cookie: None,
        });
        self.queue_raw(packet, address);
    }

    /// Ask a client whose packets arrived from an unknown address to restart its handshake
    pub fn send_restart_handshake_request(&mut self, address: SocketAddr) {
        debug!(%address, "Requesting handshake restart");
        let mut packet = BitBuffer::with_capacity_bits(RESTART_HANDSHAKE_PACKET_SIZE_BITS);
        packet.write_bit(true);
        packet.write_bit(true);
        self.queue_raw(packet, Some(address));
    }

    /// `Some(restarted)` if the last successful challenge came from `address`
    pub fn has_passed_challenge(&self, address: &SocketAddr) -> Option<bool> {
        self.last_challenge_success
            .filter(|success| success.address == *address)
            .map(|success| success.restarted)
    }

    pub fn challenge_success(&self) -> Option<&ChallengeSuccess> {
        self.last_challenge_success.as_ref()
    }

    /// Forget the last successful challenge once the transport has acted on it
    pub fn reset_challenge_data(&mut self) {
        self.last_challenge_success = None;
    }

    /// True if the last restarted challenge carried `other`'s authorised cookie, identifying
    /// `other` as the connection to rebind.
    pub fn does_restarted_handshake_match(&self, other: &StatelessConnectComponent) -> bool {
        self.last_challenge_success.is_some_and(|success| {
            success.restarted
                && other.has_authorised_cookie()
                && success
                    .original_cookie
                    .is_some_and(|original| constant_time_eq(&original, &other.authorised_cookie))
        })
    }

    fn handle_challenge_response(&mut self, address: SocketAddr, fields: HandshakeFields, packet: &mut BitBuffer) {
        match self.check_cookie(&address, &fields) {
            CookieCheck::Valid => {
                let (server_sequence, client_sequence) = sequences_from_cookie(&fields.cookie);
                let restarted = fields.restart && fields.original_cookie.is_some();
                self.last_challenge_success = Some(ChallengeSuccess {
                    address,
                    restarted,
                    cookie: fields.cookie,
                    original_cookie: fields.original_cookie.filter(|_| restarted),
                    server_sequence,
                    client_sequence,
                });
                global_metrics().handshake_completed();
                info!(%address, restarted, "Handshake challenge passed");
                self.send_challenge_ack(Some(address), fields.cookie);
                packet.drop_silently();
            }
            CookieCheck::Expired => {
                trace!(%address, "Expired handshake cookie");
                packet.drop_silently();
            }
            CookieCheck::Mismatch => {
                global_metrics().handshake_rejected();
                debug!(%address, "Handshake cookie mismatch");
                packet.set_error();
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection-bound
    // ------------------------------------------------------------------

    /// Seed a server connection's component from the challenge that created it
    pub fn init_from_challenge(&mut self, success: &ChallengeSuccess) {
        self.authorised_cookie = success.cookie;
        self.last_server_sequence = success.server_sequence;
        self.last_client_sequence = success.client_sequence;
        self.state = ComponentState::Initialized;
    }

    pub fn authorised_cookie(&self) -> &Cookie {
        &self.authorised_cookie
    }

    fn has_authorised_cookie(&self) -> bool {
        self.authorised_cookie != [0u8; COOKIE_BYTE_SIZE]
    }

    /// A client is repeating the handshake after a server restart request
    pub fn is_restarting(&self) -> bool {
        self.restarted_handshake
    }

    pub fn last_server_sequence(&self) -> u16 {
        self.last_server_sequence
    }

    pub fn last_client_sequence(&self) -> u16 {
        self.last_client_sequence
    }

    fn send_initial_packet(&mut self) {
        let packet = handshake_packet(&HandshakeFields {
            restart: self.restarted_handshake,
            secret_id: 0,
            timestamp: 0.0,
            cookie: [0u8; COOKIE_BYTE_SIZE],
            original_cookie: None,
        });
        self.queue_raw(packet, None);
        self.last_client_send_time = self.elapsed;
    }

    fn send_challenge_response(&mut self) {
        let packet = handshake_packet(&HandshakeFields {
            restart: self.restarted_handshake,
            secret_id: self.last_secret_id,
            timestamp: self.last_timestamp,
            cookie: self.last_cookie,
            original_cookie: self.restarted_handshake.then_some(self.authorised_cookie),
        });
        self.queue_raw(packet, None);
        self.last_client_send_time = self.elapsed;
    }

    fn awaiting_ack(&self) -> bool {
        self.restarted_handshake
            || matches!(
                self.state,
                ComponentState::LocalReady | ComponentState::RemoteReady
            )
    }

    fn client_incoming_handshake(&mut self, parsed: ParsedHandshake, packet: &mut BitBuffer) {
        match parsed {
            ParsedHandshake::RestartRequest => {
                if self.state == ComponentState::Initialized && self.has_authorised_cookie() {
                    if !self.restarted_handshake {
                        info!("Server requested handshake restart");
                        self.restarted_handshake = true;
                        self.last_timestamp = 0.0;
                        global_metrics().handshake_started();
                        self.send_initial_packet();
                    }
                } else {
                    trace!("Ignoring restart request before handshake completed");
                }
                packet.drop_silently();
            }
            ParsedHandshake::Packet(fields) if fields.timestamp > 0.0 => {
                if self.awaiting_ack() {
                    self.last_secret_id = fields.secret_id;
                    self.last_timestamp = fields.timestamp;
                    self.last_cookie = fields.cookie;
                    if self.state == ComponentState::LocalReady {
                        self.state = ComponentState::RemoteReady;
                    }
                    trace!(timestamp = fields.timestamp, "Answering handshake challenge");
                    self.send_challenge_response();
                }
                packet.drop_silently();
            }
            ParsedHandshake::Packet(fields) if fields.timestamp < 0.0 => {
                if self.awaiting_ack() && self.last_timestamp > 0.0 {
                    self.authorised_cookie = fields.cookie;
                    if self.restarted_handshake {
                        self.restarted_handshake = false;
                        info!("Restarted handshake acknowledged");
                    } else {
                        let (server_sequence, client_sequence) = sequences_from_cookie(&fields.cookie);
                        self.last_server_sequence = server_sequence;
                        self.last_client_sequence = client_sequence;
                        self.state = ComponentState::Initialized;
                        info!(server_sequence, client_sequence, "Handshake acknowledged");
                    }
                }
                packet.drop_silently();
            }
            ParsedHandshake::Packet(_) => {
                debug!("Client received an InitialConnect packet");
                packet.set_error();
            }
        }
    }

    fn server_incoming_handshake(&mut self, parsed: ParsedHandshake, packet: &mut BitBuffer) {
        match parsed {
            ParsedHandshake::Packet(fields)
                if fields.timestamp > 0.0
                    && (constant_time_eq(&fields.cookie, &self.authorised_cookie)
                        || fields
                            .original_cookie
                            .is_some_and(|c| constant_time_eq(&c, &self.authorised_cookie))) =>
            {
                trace!("Duplicate challenge response, resending ack");
                let cookie = self.authorised_cookie;
                self.send_challenge_ack(None, cookie);
                packet.drop_silently();
            }
            _ => packet.drop_silently(),
        }
    }

    fn strip_handshake_bit(packet: &mut BitBuffer) -> Option<bool> {
        match packet.read_bit() {
            Ok(bit) => Some(bit),
            Err(_) => {
                packet.set_error();
                None
            }
        }
    }
}

impl Default for StatelessConnectComponent {
    fn default() -> Self {
        Self::new(&HandshakeConfig::default())
    }
}

impl HandlerComponent for StatelessConnectComponent {
    fn name(&self) -> &'static str {
        "stateless_connect"
    }

    fn state(&self) -> ComponentState {
        self.state
    }

    fn initialize(&mut self, mode: HandlerMode) {
        self.mode = Some(mode);
        if mode == HandlerMode::Server {
            let mut rng = rand::rng();
            for secret in self.secrets.0.iter_mut() {
                rng.fill(&mut secret[..]);
            }
            self.last_secret_update_timestamp = self.elapsed as f32;
            self.previous_secret_update_timestamp = self.last_secret_update_timestamp;
            self.state = ComponentState::Initialized;
        }
    }

    #[instrument(skip(self))]
    fn begin_handshaking(&mut self) {
        if self.is_server() {
            return;
        }
        debug!("Starting stateless handshake");
        global_metrics().handshake_started();
        self.state = ComponentState::LocalReady;
        self.send_initial_packet();
    }

    fn incoming(&mut self, packet: &mut BitBuffer) {
        match Self::strip_handshake_bit(packet) {
            Some(true) => {}
            _ => return,
        }

        let parsed = match parse_handshake(packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "Malformed handshake packet");
                packet.set_error();
                return;
            }
        };

        if self.is_server() {
            self.server_incoming_handshake(parsed, packet);
        } else {
            self.client_incoming_handshake(parsed, packet);
        }
    }

    fn outgoing(&mut self, packet: &mut BitBuffer, _traits: &mut OutgoingPacketTraits) {
        let mut wrapped = BitBuffer::with_capacity_bits(packet.remaining_bits() + 1);
        wrapped.write_bit(false);
        wrapped.append_remaining(packet);
        *packet = wrapped;
    }

    fn incoming_connectionless(&mut self, address: SocketAddr, packet: &mut BitBuffer) {
        match Self::strip_handshake_bit(packet) {
            Some(true) => {}
            _ => return,
        }

        if !self.is_server() {
            packet.drop_silently();
            return;
        }

        let fields = match parse_handshake(packet) {
            Ok(ParsedHandshake::Packet(fields)) => fields,
            Ok(ParsedHandshake::RestartRequest) => {
                debug!(%address, "Server received a restart request");
                packet.set_error();
                return;
            }
            Err(e) => {
                debug!(%address, error = %e, "Malformed handshake packet");
                packet.set_error();
                return;
            }
        };

        if fields.timestamp == 0.0 {
            self.send_connect_challenge(address);
            packet.drop_silently();
        } else if fields.timestamp > 0.0 {
            self.handle_challenge_response(address, fields, packet);
        } else {
            debug!(%address, "Server received a handshake ack");
            packet.set_error();
        }
    }

    fn outgoing_connectionless(
        &mut self,
        _address: SocketAddr,
        packet: &mut BitBuffer,
        traits: &mut OutgoingPacketTraits,
    ) {
        self.outgoing(packet, traits);
    }

    fn tick(&mut self, delta_time: f32) {
        self.elapsed += f64::from(delta_time.max(0.0));

        if self.is_server() {
            if self.elapsed as f32 - self.last_secret_update_timestamp
                >= self.next_secret_update_interval
            {
                self.update_secret();
            }
        } else if self.awaiting_ack()
            && self.elapsed - self.last_client_send_time >= f64::from(self.handshake_resend_interval)
        {
            if self.last_timestamp > 0.0 {
                trace!("Resending challenge response");
                self.send_challenge_response();
            } else {
                trace!("Resending initial handshake packet");
                self.send_initial_packet();
            }
        }
    }

    fn is_valid(&self) -> bool {
        self.max_cookie_lifetime > 0.0 && self.handshake_resend_interval > 0.0
    }

    fn reserved_packet_bits(&self) -> u32 {
        RESTART_RESPONSE_SIZE_BITS as u32
    }

    fn requires_handshake(&self) -> bool {
        true
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

/// Handshake configuration with a short rotation period, used by tests
#[cfg(test)]
pub(crate) fn fast_rotation_config() -> HandshakeConfig {
    use std::time::Duration;
    HandshakeConfig {
        secret_update_time: Duration::from_secs(2),
        secret_update_time_variance: Duration::ZERO,
        handshake_resend_interval: Duration::from_millis(500),
    }
}

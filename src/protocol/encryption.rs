//! # AES Encryption Component
//!
//! AES-256 block encryption of whole packets.
//!
//! ## Wire Format
//! ```text
//! [encrypted: 1] [payload]                                  encrypted = 0
//! [encrypted: 1] [AES-256-ECB(payload ‖ 1 ‖ 0* ‖ pkcs7)]    encrypted = 1
//! ```
//! The plaintext is terminated with a `1` bit, zero-padded to a byte and then PKCS#7-padded to
//! the 128-bit block size. After removing the block padding the final byte always holds the
//! termination bit, so the receiver recovers the exact bit length without a length field.
//!
//! ## Security
//! - Keys are zeroized on drop and on replacement
//! - Packets flagged as encrypted that arrive before a key is set are dropped silently
//! - Bad block alignment or a missing termination marker marks the packet corrupt

use crate::config::{EncryptionConfig, ENCRYPTION_KEY_BYTES};
use crate::core::{terminated_bit_count, BitBuffer, OutgoingPacketTraits};
use crate::error::{constants, HandlerError, Result};
use crate::protocol::component::{ComponentState, HandlerComponent, HandlerMode};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use std::any::Any;
use tracing::{debug, instrument, trace};
use zeroize::Zeroizing;

/// AES block size in bits
pub const BLOCK_SIZE_BITS: usize = 128;
const BLOCK_SIZE_BYTES: usize = BLOCK_SIZE_BITS / 8;

/// Append PKCS#7 padding up to the next block boundary (always at least one byte)
fn pad_block(data: &mut Vec<u8>) {
    let pad = BLOCK_SIZE_BYTES - data.len() % BLOCK_SIZE_BYTES;
    data.resize(data.len() + pad, pad as u8);
}

/// Length of `data` without its PKCS#7 padding, or `None` if the padding is malformed
fn unpadded_len(data: &[u8]) -> Option<usize> {
    let pad = usize::from(*data.last()?);
    if pad == 0 || pad > BLOCK_SIZE_BYTES || pad > data.len() {
        return None;
    }
    let body = data.len() - pad;
    data[body..].iter().all(|&b| usize::from(b) == pad).then_some(body)
}

/// Whole-packet AES-256 encryption
pub struct AesEncryptionComponent {
    state: ComponentState,
    key: Option<Zeroizing<[u8; ENCRYPTION_KEY_BYTES]>>,
    cipher: Option<Aes256>,
    enabled: bool,
}

impl std::fmt::Debug for AesEncryptionComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesEncryptionComponent")
            .field("state", &self.state)
            .field("has_key", &self.key.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AesEncryptionComponent {
    /// Component with no key; packets pass through unencrypted
    pub fn new() -> Self {
        Self {
            state: ComponentState::Uninitialized,
            key: None,
            cipher: None,
            enabled: false,
        }
    }

    /// Component with `key` set and encryption enabled
    pub fn with_key(key: [u8; ENCRYPTION_KEY_BYTES]) -> Self {
        let mut component = Self::new();
        component.install_key(Zeroizing::new(key));
        component.enabled = true;
        component
    }

    /// Build from configuration. A configured key is installed; `enabled` requests encryption.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        let mut component = Self::new();
        if let Some(key) = config.key_bytes()? {
            component.install_key(Zeroizing::new(key));
        }
        component.enabled = config.enabled;
        Ok(component)
    }

    /// Replace the key. Takes effect for the next packet in either direction.
    ///
    /// # Errors
    /// `CryptoError` unless `key` is exactly 32 bytes.
    #[instrument(skip(self, key))]
    pub fn set_encryption_key(&mut self, key: &[u8]) -> Result<()> {
        let key: [u8; ENCRYPTION_KEY_BYTES] = key
            .try_into()
            .map_err(|_| HandlerError::CryptoError(constants::ERR_INVALID_KEY_LENGTH.into()))?;
        self.install_key(Zeroizing::new(key));
        debug!("Encryption key updated");
        Ok(())
    }

    fn install_key(&mut self, key: Zeroizing<[u8; ENCRYPTION_KEY_BYTES]>) {
        self.cipher = Some(Aes256::new(GenericArray::from_slice(key.as_slice())));
        self.key = Some(key);
    }

    /// Request encryption of outgoing packets. Has no effect on the wire until a key is set.
    pub fn enable_encryption(&mut self) {
        self.enabled = true;
    }

    pub fn disable_encryption(&mut self) {
        self.enabled = false;
    }

    /// True when outgoing packets are actually being encrypted
    pub fn is_encryption_enabled(&self) -> bool {
        self.enabled && self.cipher.is_some()
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }
}

impl Default for AesEncryptionComponent {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerComponent for AesEncryptionComponent {
    fn name(&self) -> &'static str {
        "aes_encryption"
    }

    fn state(&self) -> ComponentState {
        self.state
    }

    fn initialize(&mut self, _mode: HandlerMode) {
        self.state = ComponentState::Initialized;
    }

    fn incoming(&mut self, packet: &mut BitBuffer) {
        let encrypted = match packet.read_bit() {
            Ok(flag) => flag,
            Err(_) => {
                packet.set_error();
                return;
            }
        };
        if !encrypted {
            return;
        }

        let Some(cipher) = self.cipher.as_ref() else {
            trace!("Encrypted packet received before a key was set");
            packet.drop_silently();
            return;
        };

        let cipher_bits = packet.remaining_bits();
        if cipher_bits == 0 || cipher_bits % BLOCK_SIZE_BITS != 0 {
            debug!(cipher_bits, "Ciphertext is not block aligned");
            packet.set_error();
            return;
        }

        let mut data = Zeroizing::new(vec![0u8; cipher_bits / 8]);
        if packet.read_bytes(&mut data).is_err() {
            packet.set_error();
            return;
        }
        for block in data.chunks_exact_mut(BLOCK_SIZE_BYTES) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let plain = match unpadded_len(&data) {
            Some(len) => &data[..len],
            None => {
                debug!("Decrypted packet has malformed block padding");
                packet.set_error();
                return;
            }
        };
        match terminated_bit_count(plain) {
            Some(bit_count) => packet.set_data(plain, bit_count),
            None => {
                debug!("Decrypted packet has no termination marker");
                packet.set_error();
            }
        }
    }

    fn outgoing(&mut self, packet: &mut BitBuffer, _traits: &mut OutgoingPacketTraits) {
        let mut wrapped = BitBuffer::with_capacity_bits(
            packet.remaining_bits() + self.reserved_packet_bits() as usize,
        );

        match self.cipher.as_ref().filter(|_| self.enabled) {
            Some(cipher) => {
                let mut plain =
                    BitBuffer::with_capacity_bits(packet.remaining_bits() + BLOCK_SIZE_BITS + 8);
                plain.append_remaining(packet);
                plain.write_termination();

                let mut data = Zeroizing::new(plain.as_bytes().to_vec());
                pad_block(&mut data);
                for block in data.chunks_exact_mut(BLOCK_SIZE_BYTES) {
                    cipher.encrypt_block(GenericArray::from_mut_slice(block));
                }

                wrapped.write_bit(true);
                wrapped.write_bytes(&data);
            }
            None => {
                wrapped.write_bit(false);
                wrapped.append_remaining(packet);
            }
        }

        *packet = wrapped;
    }

    fn is_valid(&self) -> bool {
        !self.enabled || self.key.is_some()
    }

    /// Flag bit, termination bit, byte alignment and up to a full block of padding
    fn reserved_packet_bits(&self) -> u32 {
        1 + 1 + 7 + BLOCK_SIZE_BITS as u32
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

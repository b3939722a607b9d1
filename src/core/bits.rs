//! Bit-granular packet buffer.
//!
//! Bits are stored LSB-first within each byte: bit `n` of a stream lives in byte `n >> 3` under
//! mask `1 << (n & 7)`. A [`BitBuffer`] carries a write end (`num_bits`) and a read cursor
//! (`position`), so a component can consume its own header from the front of an incoming packet
//! and leave the rest for the next stage.

use crate::error::{constants, HandlerError, Result};

/// Maximum encoded size of a packed `u32` in bits (five 8-bit groups).
pub const MAX_PACKED_U32_BITS: u32 = 40;

/// Growable bit buffer with a read cursor and an error flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    data: Vec<u8>,
    num_bits: usize,
    pos: usize,
    error: bool,
}

impl BitBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `bits` bits
    pub fn with_capacity_bits(bits: usize) -> Self {
        Self {
            data: Vec::with_capacity(bits.div_ceil(8)),
            ..Self::default()
        }
    }

    /// Copy the first `num_bits` bits of `bytes` into a new buffer.
    ///
    /// `num_bits` is clamped to the length of `bytes`; bits past it in the final byte are cleared.
    pub fn from_bytes(bytes: &[u8], num_bits: usize) -> Self {
        let num_bits = num_bits.min(bytes.len() * 8);
        let mut data = bytes[..num_bits.div_ceil(8)].to_vec();
        clear_trailing_bits(&mut data, num_bits);
        Self {
            data,
            num_bits,
            pos: 0,
            error: false,
        }
    }

    /// Total number of bits written
    #[inline]
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Current read cursor
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bits between the read cursor and the write end
    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.num_bits - self.pos
    }

    /// True when nothing is left to read
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0
    }

    /// Underlying bytes (all written bits, including already-read ones)
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// True once a stage has flagged this packet as corrupt
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Flag the packet as corrupt or adversarial. The handler drops it and reports
    /// `ProcessedPacket::error`.
    pub fn set_error(&mut self) {
        self.error = true;
        self.truncate(self.pos);
    }

    /// Discard the unread part of the packet without flagging an error.
    pub fn drop_silently(&mut self) {
        self.truncate(self.pos);
    }

    /// Replace the contents with `num_bits` bits of `bytes` and rewind the cursor.
    pub fn set_data(&mut self, bytes: &[u8], num_bits: usize) {
        let error = self.error;
        *self = Self::from_bytes(bytes, num_bits);
        self.error = error;
    }

    /// Shrink the write end to `num_bits`, clearing any bits past it.
    pub fn truncate(&mut self, num_bits: usize) {
        if num_bits >= self.num_bits {
            return;
        }
        self.num_bits = num_bits;
        self.pos = self.pos.min(num_bits);
        self.data.truncate(num_bits.div_ceil(8));
        clear_trailing_bits(&mut self.data, num_bits);
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Append a single bit
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        let byte = self.num_bits >> 3;
        if byte == self.data.len() {
            self.data.push(0);
        }
        let mask = 1u8 << (self.num_bits & 7);
        if bit {
            self.data[byte] |= mask;
        } else {
            self.data[byte] &= !mask;
        }
        self.num_bits += 1;
    }

    /// Append the low `count` bits of `value`, least significant first
    pub fn write_bits(&mut self, value: u64, count: u32) {
        debug_assert!(count <= 64);
        for i in 0..count {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Append whole bytes at the current (possibly unaligned) write position
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.num_bits & 7 == 0 {
            self.data.truncate(self.num_bits >> 3);
            self.data.extend_from_slice(bytes);
            self.num_bits += bytes.len() * 8;
        } else {
            for &b in bytes {
                self.write_bits(u64::from(b), 8);
            }
        }
    }

    /// Append an IEEE-754 single as its 32 raw bits
    pub fn write_f32(&mut self, value: f32) {
        self.write_bits(u64::from(value.to_bits()), 32);
    }

    /// Append a packed unsigned integer: 8-bit groups, each holding 7 value bits above a
    /// "more follows" flag in bit 0.
    pub fn write_packed_u32(&mut self, mut value: u32) {
        loop {
            let mut group = ((value & 0x7f) << 1) as u8;
            value >>= 7;
            if value != 0 {
                group |= 1;
            }
            self.write_bits(u64::from(group), 8);
            if value == 0 {
                break;
            }
        }
    }

    /// Append the first `bit_count` bits of `src`
    pub fn append_bits(&mut self, src: &[u8], bit_count: usize) {
        let bit_count = bit_count.min(src.len() * 8);
        if self.num_bits & 7 == 0 && bit_count & 7 == 0 {
            self.write_bytes(&src[..bit_count >> 3]);
            return;
        }
        for i in 0..bit_count {
            self.write_bit(src[i >> 3] & (1 << (i & 7)) != 0);
        }
    }

    /// Append every unread bit of `other`
    pub fn append_remaining(&mut self, other: &BitBuffer) {
        if other.pos & 7 == 0 {
            self.append_bits(&other.data[other.pos >> 3..], other.remaining_bits());
        } else {
            for i in other.pos..other.num_bits {
                self.write_bit(other.bit_at(i));
            }
        }
    }

    /// Append a termination `1` bit. Zero padding to the byte boundary is implicit.
    pub fn write_termination(&mut self) {
        self.write_bit(true);
    }

    /// Pad with zero bits until `num_bits` is a multiple of `alignment`
    pub fn pad_to(&mut self, alignment: usize) {
        while self.num_bits % alignment != 0 {
            self.write_bit(false);
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    #[inline]
    fn bit_at(&self, index: usize) -> bool {
        self.data[index >> 3] & (1 << (index & 7)) != 0
    }

    #[inline]
    fn ensure(&self, requested: usize) -> Result<()> {
        if requested > self.remaining_bits() {
            return Err(HandlerError::ReadOverflow {
                requested,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Read one bit
    pub fn read_bit(&mut self) -> Result<bool> {
        self.ensure(1)?;
        let bit = self.bit_at(self.pos);
        self.pos += 1;
        Ok(bit)
    }

    /// Read `count` bits, least significant first
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        debug_assert!(count <= 64);
        self.ensure(count as usize)?;
        let mut value = 0u64;
        for i in 0..count {
            if self.bit_at(self.pos) {
                value |= 1 << i;
            }
            self.pos += 1;
        }
        Ok(value)
    }

    /// Fill `out` with the next `out.len()` bytes
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        self.ensure(out.len() * 8)?;
        if self.pos & 7 == 0 {
            let start = self.pos >> 3;
            out.copy_from_slice(&self.data[start..start + out.len()]);
            self.pos += out.len() * 8;
        } else {
            for byte in out.iter_mut() {
                *byte = self.read_bits(8)? as u8;
            }
        }
        Ok(())
    }

    /// Read an IEEE-754 single
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_bits(32)? as u32))
    }

    /// Read a packed unsigned integer written by [`write_packed_u32`](Self::write_packed_u32)
    pub fn read_packed_u32(&mut self) -> Result<u32> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let group = self.read_bits(8)?;
            value |= (group >> 1) << shift;
            if group & 1 == 0 {
                break;
            }
            shift += 7;
            if shift >= MAX_PACKED_U32_BITS - 5 {
                return Err(HandlerError::MalformedPacket(
                    constants::ERR_MALFORMED_PACKED_INT.into(),
                ));
            }
        }
        u32::try_from(value)
            .map_err(|_| HandlerError::MalformedPacket(constants::ERR_MALFORMED_PACKED_INT.into()))
    }

    /// Copy every unread bit into `out`, starting at bit 0. Returns the bit count.
    pub fn copy_remaining_into(&self, out: &mut Vec<u8>) -> usize {
        out.clear();
        let count = self.remaining_bits();
        if self.pos & 7 == 0 {
            let start = self.pos >> 3;
            out.extend_from_slice(&self.data[start..start + count.div_ceil(8)]);
        } else {
            out.resize(count.div_ceil(8), 0);
            for i in 0..count {
                if self.bit_at(self.pos + i) {
                    out[i >> 3] |= 1 << (i & 7);
                }
            }
        }
        count
    }

    /// Move the unread bits to the front so the buffer starts at its read cursor.
    pub fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        let mut out = Vec::with_capacity(self.remaining_bits().div_ceil(8));
        let count = self.copy_remaining_into(&mut out);
        self.data = out;
        self.num_bits = count;
        self.pos = 0;
    }
}

/// Clear every bit at or beyond `num_bits` in the final byte of `data`.
fn clear_trailing_bits(data: &mut [u8], num_bits: usize) {
    let used = num_bits & 7;
    if used != 0 {
        if let Some(last) = data.last_mut() {
            *last &= (1u8 << used) - 1;
        }
    }
}

/// Number of payload bits in a terminated datagram, i.e. the index of its highest set bit.
///
/// Returns `None` when the datagram is empty or its final byte is zero; a sender using
/// [`BitBuffer::write_termination`] never produces either.
pub fn terminated_bit_count(bytes: &[u8]) -> Option<usize> {
    let last = *bytes.last()?;
    if last == 0 {
        return None;
    }
    let high_bit = 7 - last.leading_zeros() as usize;
    Some((bytes.len() - 1) * 8 + high_bit)
}

//! Bit-level packing.
//!
//! The interest packets pack fields of arbitrary width back to back, most
//! significant bit first, with no byte alignment between fields. All
//! offset arithmetic lives here so packet code only says
//! `write_bits(value, width)` and `read_bits(width)`.

use bytes::Bytes;
use thiserror::Error;

/// Widest field a single call may read or write.
pub const MAX_FIELD_BITS: u8 = 32;

/// Errors raised by [`BitWriter`] and [`BitReader`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitError {
    #[error("field width {0} exceeds {MAX_FIELD_BITS} bits")]
    WidthTooLarge(u8),
    #[error("value {value} does not fit in {width} bits")]
    ValueTooWide { value: u32, width: u8 },
    #[error("read of {width} bits at bit {offset} runs past {available} bits")]
    Underrun {
        offset: usize,
        width: u8,
        available: usize,
    },
}

/// Returns true if `value` is representable in `width` unsigned bits.
pub fn fits(value: u32, width: u8) -> bool {
    width >= 32 || value >> width == 0
}

/// Wraps a signed value into `width` bits (two's complement).
pub fn wrap_signed(value: i32, width: u8) -> u32 {
    let modulus = 1i64 << width;
    (i64::from(value).rem_euclid(modulus)) as u32
}

/// Interprets a `width`-bit field as two's complement.
pub fn unwrap_signed(raw: u32, width: u8) -> i32 {
    let half = 1u32 << (width - 1);
    if raw >= half {
        raw as i32 - (1i32 << width)
    } else {
        raw as i32
    }
}

/// Appends bit fields to a growable byte buffer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Writes the low `width` bits of `value`, MSB first.
    ///
    /// The value must already fit; callers wrap signed offsets with
    /// [`wrap_signed`] before writing.
    pub fn write_bits(&mut self, value: u32, width: u8) -> Result<(), BitError> {
        if width > MAX_FIELD_BITS {
            return Err(BitError::WidthTooLarge(width));
        }
        if !fits(value, width) {
            return Err(BitError::ValueTooWide { value, width });
        }

        let mut remaining = width;
        while remaining > 0 {
            let bit_in_byte = (self.bit_len & 7) as u8;
            if bit_in_byte == 0 {
                self.buf.push(0);
            }
            let free = 8 - bit_in_byte;
            let take = free.min(remaining);
            let shift = remaining - take;
            let chunk = ((u64::from(value) >> shift) & ((1u64 << take) - 1)) as u8;
            let last = self.buf.len() - 1;
            self.buf[last] |= chunk << (free - take);
            remaining -= take;
            self.bit_len += take as usize;
        }
        Ok(())
    }

    pub fn write_bool(&mut self, flag: bool) -> Result<(), BitError> {
        self.write_bits(u32::from(flag), 1)
    }

    /// Finishes the buffer. Trailing bits of the last byte are zero.
    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Reads bit fields from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current bit offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.offset
    }

    pub fn read_bits(&mut self, width: u8) -> Result<u32, BitError> {
        if width > MAX_FIELD_BITS {
            return Err(BitError::WidthTooLarge(width));
        }
        if usize::from(width) > self.remaining_bits() {
            return Err(BitError::Underrun {
                offset: self.offset,
                width,
                available: self.data.len() * 8,
            });
        }

        let mut value: u64 = 0;
        let mut remaining = width;
        while remaining > 0 {
            let byte = self.data[self.offset >> 3];
            let bit_in_byte = (self.offset & 7) as u8;
            let free = 8 - bit_in_byte;
            let take = free.min(remaining);
            let chunk = (byte >> (free - take)) & (((1u16 << take) - 1) as u8);
            value = (value << take) | u64::from(chunk);
            remaining -= take;
            self.offset += take as usize;
        }
        Ok(value as u32)
    }

    pub fn read_bool(&mut self) -> Result<bool, BitError> {
        Ok(self.read_bits(1)? == 1)
    }
}

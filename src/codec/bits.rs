//! Fixed-width bit packing, MSB first.
//!
//! Symbols of width W ∈ {6, 7, 8} are concatenated into one bit string with
//! no padding between them; only the final byte carries zero pad bits in its
//! low end.  `n` symbols always occupy `ceil(n × W / 8)` bytes, which lets a
//! reader skip a payload knowing nothing but its declared symbol count.

use crate::codec::Format;
use crate::error::{DropletError, Result};

/// Bytes needed to hold `symbols` symbols of `width` bits.
///
/// Computed in 128 bits; for `width <= 8` the result never exceeds `symbols`.
pub const fn packed_len(symbols: u64, width: u32) -> u64 {
    ((symbols as u128 * width as u128 + 7) / 8) as u64
}

#[inline]
const fn mask(width: u32) -> u32 {
    (1u32 << width) - 1
}

// ── Register ─────────────────────────────────────────────────────────────────

/// Shift register with an explicit fill count.
///
/// Bits enter at the low end and leave from the high end.  Callers drain
/// whole units before pushing again, so at most 15 bits are ever pending.
#[derive(Debug, Default, Clone, Copy)]
struct BitRegister {
    bits: u32,
    len:  u32,
}

impl BitRegister {
    const CAPACITY: u32 = 16;

    #[inline]
    fn push(&mut self, value: u8, width: u32) {
        debug_assert!(width <= 8 && self.len + width <= Self::CAPACITY);
        self.bits = (self.bits << width) | (u32::from(value) & mask(width));
        self.len += width;
    }

    /// Remove the `width` oldest bits, or `None` if fewer are pending.
    #[inline]
    fn take(&mut self, width: u32) -> Option<u8> {
        if self.len < width {
            return None;
        }
        self.len -= width;
        let value = (self.bits >> self.len) & mask(width);
        self.bits &= mask(self.len);
        Some(value as u8)
    }

    /// Pending bits left-aligned in one byte, low bits zero.
    fn flush_partial(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = (self.bits << (8 - self.len)) as u8;
        *self = Self::default();
        Some(byte)
    }
}

// ── Packing ──────────────────────────────────────────────────────────────────

/// Pack `symbols` at the width of `format`.
///
/// Fails with [`DropletError::InvalidSymbol`] if a symbol does not fit in the
/// width.  The 8-bit format is the identity.
pub fn pack(symbols: &[u8], format: Format) -> Result<Vec<u8>> {
    let width = format.bits_per_symbol();
    if width == 8 {
        return Ok(symbols.to_vec());
    }

    let mut out = Vec::with_capacity(packed_len(symbols.len() as u64, width) as usize);
    let mut reg = BitRegister::default();
    for &symbol in symbols {
        if u32::from(symbol) > mask(width) {
            return Err(DropletError::InvalidSymbol { value: symbol, width });
        }
        reg.push(symbol, width);
        while let Some(byte) = reg.take(8) {
            out.push(byte);
        }
    }
    out.extend(reg.flush_partial());
    Ok(out)
}

/// Unpack exactly `count` symbols from `bytes`.
///
/// Pad bits after the last symbol are ignored.
pub fn unpack(bytes: &[u8], count: u64, format: Format) -> Result<Vec<u8>> {
    Ok(SymbolReader::new(bytes, count, format)?.collect())
}

/// Streaming unpacker: yields `count` symbols, pulling bytes as needed.
#[derive(Debug, Clone)]
pub struct SymbolReader<'a> {
    bytes:     std::slice::Iter<'a, u8>,
    reg:       BitRegister,
    width:     u32,
    remaining: u64,
}

impl<'a> SymbolReader<'a> {
    /// Fails with [`DropletError::StreamTruncated`] if `bytes` is shorter
    /// than `count` symbols need; the offset is relative to `bytes`.
    pub fn new(bytes: &'a [u8], count: u64, format: Format) -> Result<Self> {
        let width = format.bits_per_symbol();
        let needed = packed_len(count, width);
        if (bytes.len() as u64) < needed {
            return Err(DropletError::StreamTruncated { offset: bytes.len() as u64 });
        }
        Ok(Self {
            bytes: bytes[..needed as usize].iter(),
            reg: BitRegister::default(),
            width,
            remaining: count,
        })
    }
}

impl Iterator for SymbolReader<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            if let Some(symbol) = self.reg.take(self.width) {
                self.remaining -= 1;
                return Some(symbol);
            }
            let byte = *self.bytes.next()?;
            self.reg.push(byte, 8);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

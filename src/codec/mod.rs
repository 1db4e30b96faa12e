//! Payload formats and their codecs.
//!
//! A droplet's format byte selects how its payload is stored:
//!
//! | byte  | format    | symbol width | declared length counts |
//! |-------|-----------|--------------|------------------------|
//! | `'6'` | `Packed6` | 6 bits       | symbols                |
//! | `'7'` | `Packed7` | 7 bits       | symbols                |
//! | `'8'` | `Raw8`    | 8 bits       | bytes                  |
//!
//! One source byte is one symbol in every format, so the declared length is
//! always the decoded byte count; only the physical payload size differs.

pub mod alphabet;
pub mod bits;

use std::fmt;

use serde::Serialize;

use crate::error::{DropletError, Result};

/// Decoded bytes are handed to the sink in chunks of this size.
const DECODE_CHUNK: usize = 8 * 1024;

// ── Format ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Format {
    #[serde(rename = "6")]
    Packed6,
    #[serde(rename = "7")]
    Packed7,
    #[serde(rename = "8")]
    Raw8,
}

impl Format {
    /// The on-disk format byte.
    #[inline]
    pub const fn byte(self) -> u8 {
        match self {
            Format::Packed6 => b'6',
            Format::Packed7 => b'7',
            Format::Raw8    => b'8',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'6' => Some(Format::Packed6),
            b'7' => Some(Format::Packed7),
            b'8' => Some(Format::Raw8),
            _    => None,
        }
    }

    #[inline]
    pub const fn bits_per_symbol(self) -> u32 {
        match self {
            Format::Packed6 => 6,
            Format::Packed7 => 7,
            Format::Raw8    => 8,
        }
    }

    /// Physical payload bytes for a declared length.
    #[inline]
    pub const fn physical_len(self, declared_len: u64) -> u64 {
        bits::packed_len(declared_len, self.bits_per_symbol())
    }

    /// Parse from a CLI string: `6`, `7`, `8` or the variant name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "6" | "packed6" => Some(Format::Packed6),
            "7" | "packed7" => Some(Format::Packed7),
            "8" | "raw8"    => Some(Format::Raw8),
            _               => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.byte() as char)
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec {
    fn format(&self) -> Format;

    /// Source bytes → physical payload.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decode `symbols` bytes from `payload`, feeding them to `sink` in
    /// bounded chunks.
    fn decode_with(
        &self,
        payload: &[u8],
        symbols: u64,
        sink:    &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()>;

    fn decode(&self, payload: &[u8], symbols: u64) -> Result<Vec<u8>> {
        // The declared count is untrusted; never reserve more than the
        // payload can hold.
        let fits = payload.len() as u64 * 8 / u64::from(self.format().bits_per_symbol());
        let mut out = Vec::with_capacity(usize::try_from(symbols.min(fits)).unwrap_or(0));
        self.decode_with(payload, symbols, &mut |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(out)
    }
}

/// Pull symbols through `map` and hand the results to `sink` chunk by chunk.
fn drain_symbols(
    symbols: bits::SymbolReader<'_>,
    map:     impl Fn(u8) -> Result<u8>,
    sink:    &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(DECODE_CHUNK);
    for symbol in symbols {
        buf.push(map(symbol)?);
        if buf.len() == DECODE_CHUNK {
            sink(&buf)?;
            buf.clear();
        }
    }
    if !buf.is_empty() {
        sink(&buf)?;
    }
    Ok(())
}

// ── Built-in codecs ──────────────────────────────────────────────────────────

pub struct Raw8Codec;
impl Codec for Raw8Codec {
    fn format(&self) -> Format { Format::Raw8 }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode_with(
        &self,
        payload: &[u8],
        symbols: u64,
        sink:    &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let len = usize::try_from(symbols)
            .ok()
            .filter(|&n| n <= payload.len())
            .ok_or(DropletError::StreamTruncated { offset: payload.len() as u64 })?;
        for chunk in payload[..len].chunks(DECODE_CHUNK) {
            sink(chunk)?;
        }
        Ok(())
    }
}

/// Seven-bit symbols are ASCII bytes; no alphabet is involved.
pub struct Packed7Codec;
impl Codec for Packed7Codec {
    fn format(&self) -> Format { Format::Packed7 }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        bits::pack(data, Format::Packed7)
    }

    fn decode_with(
        &self,
        payload: &[u8],
        symbols: u64,
        sink:    &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let reader = bits::SymbolReader::new(payload, symbols, Format::Packed7)?;
        drain_symbols(reader, Ok, sink)
    }
}

/// Six-bit symbols index [`alphabet::ALPHABET`].
pub struct Packed6Codec;
impl Codec for Packed6Codec {
    fn format(&self) -> Format { Format::Packed6 }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let codes = data
            .iter()
            .map(|&b| alphabet::to_code(b).ok_or(DropletError::InvalidSymbol { value: b, width: 6 }))
            .collect::<Result<Vec<u8>>>()?;
        bits::pack(&codes, Format::Packed6)
    }

    fn decode_with(
        &self,
        payload: &[u8],
        symbols: u64,
        sink:    &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let reader = bits::SymbolReader::new(payload, symbols, Format::Packed6)?;
        drain_symbols(
            reader,
            |code| alphabet::from_code(code).ok_or(DropletError::InvalidSymbol { value: code, width: 6 }),
            sink,
        )
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a format to its codec.
pub fn get_codec(format: Format) -> Box<dyn Codec> {
    match format {
        Format::Packed6 => Box::new(Packed6Codec),
        Format::Packed7 => Box::new(Packed7Codec),
        Format::Raw8    => Box::new(Raw8Codec),
    }
}

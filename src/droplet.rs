//! Droplet framing: one self-describing, independently checksummed record.
//!
//! ```text
//! offset  field            size
//! 0       magic            1     0x63
//! 1       format           1     '6' | '7' | '8'
//! 2       permissions      10    see permissions.rs
//! 12      path length      2     u16 LE
//! 14      path             n     '/'-separated, no terminator
//! 14+n    declared length  6     u48 LE
//! 20+n    payload          physical_len(format, declared length)
//! ...     checksum         1     rolling hash over every preceding byte
//! ```

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::checksum;
use crate::codec::Format;
use crate::error::{DropletError, Result};
use crate::io_stream::ReadCursor;
use crate::permissions::{Permissions, PERMISSIONS_LEN};

pub const MAGIC: u8 = 0x63;

/// Magic, format, permissions and path length.
pub const FIXED_PREFIX_LEN: usize = 1 + 1 + PERMISSIONS_LEN + 2;
pub const DECLARED_LEN_BYTES: usize = 6;
pub const TRAILER_LEN: usize = 1;

pub const MAX_PATH_LEN: usize = u16::MAX as usize;
pub const MAX_DECLARED_LEN: u64 = (1 << 48) - 1;

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletHeader {
    pub format:       Format,
    pub permissions:  Permissions,
    pub path:         String,
    /// Bytes for `Raw8`, symbols for the packed formats.
    pub declared_len: u64,
}

impl DropletHeader {
    /// Directory records always carry an empty payload.
    pub fn directory(path: impl Into<String>, permissions: Permissions, format: Format) -> Self {
        Self { format, permissions, path: path.into(), declared_len: 0 }
    }

    pub fn is_dir(&self) -> bool {
        self.permissions.is_dir()
    }

    /// Bytes before the payload.
    pub fn header_len(&self) -> usize {
        FIXED_PREFIX_LEN + self.path.len() + DECLARED_LEN_BYTES
    }

    pub fn physical_len(&self) -> u64 {
        self.format.physical_len(self.declared_len)
    }

    /// Total on-disk size including the trailer.
    pub fn record_len(&self) -> u64 {
        self.header_len() as u64 + self.physical_len() + TRAILER_LEN as u64
    }

    fn check_encodable(&self, payload_len: usize) -> Result<()> {
        if self.path.len() > MAX_PATH_LEN {
            return Err(DropletError::PathTooLong { path: self.path.clone(), len: self.path.len() });
        }
        if self.declared_len > MAX_DECLARED_LEN {
            return Err(DropletError::ContentTooLong { path: self.path.clone(), len: self.declared_len });
        }
        let expected = self.physical_len();
        if payload_len as u64 != expected {
            return Err(DropletError::PayloadLength {
                path: self.path.clone(),
                expected,
                actual: payload_len as u64,
            });
        }
        Ok(())
    }
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Append one droplet to `out` starting at `out.len()`.
///
/// `payload` must already be in physical form.  The trailer covers only the
/// bytes written by this call.  Returns the new length of `out`.
pub fn encode(header: &DropletHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<usize> {
    header.check_encodable(payload.len())?;

    let start = out.len();
    out.reserve(header.record_len() as usize);

    out.push(MAGIC);
    out.push(header.format.byte());
    out.extend_from_slice(header.permissions.as_bytes());

    let mut path_len = [0u8; 2];
    LittleEndian::write_u16(&mut path_len, header.path.len() as u16);
    out.extend_from_slice(&path_len);
    out.extend_from_slice(header.path.as_bytes());

    let mut declared = [0u8; DECLARED_LEN_BYTES];
    LittleEndian::write_u48(&mut declared, header.declared_len);
    out.extend_from_slice(&declared);

    out.extend_from_slice(payload);

    let trailer = checksum(&out[start..]);
    out.push(trailer);
    Ok(out.len())
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Header and physical bounds of one droplet, relative to the whole stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub header:  DropletHeader,
    pub payload: Range<usize>,
    /// Bytes consumed including the trailer.
    pub len:     usize,
}

/// Decode the droplet starting at `offset`.
///
/// The trailer is located but not checked.  Any byte of the record missing
/// from `stream` is [`DropletError::StreamTruncated`]; this includes an
/// `offset` at end of stream, which callers treat as a clean end before
/// calling.  A path that is not UTF-8 is [`DropletError::InvalidPath`].
pub fn decode(stream: &[u8], offset: usize) -> Result<Decoded> {
    let mut cur = ReadCursor::new(stream, offset);

    let magic = cur.read_u8()?;
    if magic != MAGIC {
        return Err(DropletError::BadMagic { offset: offset as u64, found: magic });
    }
    let format_byte = cur.read_u8()?;
    let format = Format::from_byte(format_byte).ok_or(DropletError::BadFormat {
        offset: offset as u64 + 1,
        found:  format_byte,
    })?;

    let mut perms = [0u8; PERMISSIONS_LEN];
    perms.copy_from_slice(cur.take(PERMISSIONS_LEN)?);

    let path_len = cur.read_u16_le()? as usize;
    let path_bytes = cur.take(path_len)?;
    let path = match std::str::from_utf8(path_bytes) {
        Ok(path) => path.to_owned(),
        Err(_) => {
            return Err(DropletError::InvalidPath {
                path:   String::from_utf8_lossy(path_bytes).into_owned(),
                reason: "path is not valid UTF-8",
            })
        }
    };
    let declared_len = cur.read_u48_le()?;

    let header = DropletHeader {
        format,
        permissions: Permissions::from_bytes(perms),
        path,
        declared_len,
    };

    let payload_start = cur.position();
    let physical = usize::try_from(header.physical_len())
        .map_err(|_| DropletError::StreamTruncated { offset: stream.len() as u64 })?;
    cur.take(physical)?;
    cur.take(TRAILER_LEN)?;

    Ok(Decoded {
        header,
        payload: payload_start..payload_start + physical,
        len: cur.position() - offset,
    })
}

// ── Borrowed view ────────────────────────────────────────────────────────────

/// A decoded droplet borrowing its bytes from the archive image.
#[derive(Debug, Clone)]
pub struct Droplet<'a> {
    pub offset:  u64,
    pub header:  DropletHeader,
    pub payload: &'a [u8],
    /// Stored checksum byte.
    pub trailer: u8,
    /// Header and payload, i.e. everything the trailer covers.
    covered:     &'a [u8],
}

impl<'a> Droplet<'a> {
    pub fn from_decoded(stream: &'a [u8], offset: usize, decoded: Decoded) -> Self {
        let end = offset + decoded.len;
        Self {
            offset:  offset as u64,
            header:  decoded.header,
            payload: &stream[decoded.payload],
            trailer: stream[end - TRAILER_LEN],
            covered: &stream[offset..end - TRAILER_LEN],
        }
    }

    pub fn record_len(&self) -> usize {
        self.covered.len() + TRAILER_LEN
    }

    /// Recompute the checksum over header and payload.
    pub fn computed_checksum(&self) -> u8 {
        checksum(self.covered)
    }

    pub fn checksum_ok(&self) -> bool {
        self.computed_checksum() == self.trailer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_a() -> DropletHeader {
        DropletHeader::directory("a", Permissions::from_bytes(*b"drwxr-xr-x"), Format::Raw8)
    }

    #[test]
    fn directory_record_layout() {
        let mut out = Vec::new();
        let end = encode(&dir_a(), &[], &mut out).unwrap();
        assert_eq!(end, 22);

        let mut expected = vec![0x63, b'8'];
        expected.extend_from_slice(b"drwxr-xr-x");
        expected.extend_from_slice(&[1, 0, b'a', 0, 0, 0, 0, 0, 0, 0xc2]);
        assert_eq!(out, expected);
    }

    #[test]
    fn encode_appends_after_existing_bytes() {
        let mut out = vec![0xaa; 5];
        let end = encode(&dir_a(), &[], &mut out).unwrap();
        assert_eq!(end, 27);
        assert_eq!(out[..5], [0xaa; 5]);
        // Trailer covers only this record.
        assert_eq!(out[26], 0xc2);
    }

    #[test]
    fn decode_reports_bounds() {
        let header = DropletHeader {
            format: Format::Packed7,
            permissions: Permissions::from_mode(false, 0o600),
            path: "a/f.txt".into(),
            declared_len: 9,
        };
        let payload = vec![0u8; 8];
        let mut out = vec![0xff; 3];
        encode(&header, &payload, &mut out).unwrap();

        let d = decode(&out, 3).unwrap();
        assert_eq!(d.header, header);
        assert_eq!(d.payload, 3 + 27..3 + 35);
        assert_eq!(d.len as u64, header.record_len());
        assert_eq!(d.len, out.len() - 3);
    }

    #[test]
    fn declared_path_longer_than_stream() {
        let mut bytes = vec![0x63, b'8'];
        bytes.extend_from_slice(b"-rw-r--r--");
        bytes.extend_from_slice(&[10, 0]);
        bytes.extend_from_slice(b"abc");
        let err = decode(&bytes, 0).unwrap_err();
        assert!(matches!(err, DropletError::StreamTruncated { offset: 17 }));
    }

    #[test]
    fn non_utf8_path_rejected() {
        let mut out = Vec::new();
        encode(&dir_a(), &[], &mut out).unwrap();
        out[14] = 0xff;
        let err = decode(&out, 0).unwrap_err();
        assert!(matches!(err, DropletError::InvalidPath { ref path, .. } if path == "\u{fffd}"));
    }

    #[test]
    fn missing_trailer_is_truncation() {
        let mut out = Vec::new();
        encode(&dir_a(), &[], &mut out).unwrap();
        out.pop();
        assert!(matches!(decode(&out, 0), Err(DropletError::StreamTruncated { .. })));
    }

    #[test]
    fn bad_magic_and_format() {
        let mut out = Vec::new();
        encode(&dir_a(), &[], &mut out).unwrap();

        let mut bad = out.clone();
        bad[0] = 0x64;
        assert!(matches!(decode(&bad, 0), Err(DropletError::BadMagic { offset: 0, found: 0x64 })));

        let mut bad = out;
        bad[1] = b'9';
        assert!(matches!(decode(&bad, 0), Err(DropletError::BadFormat { offset: 1, found: b'9' })));
    }

    #[test]
    fn payload_must_match_declared_length() {
        let mut header = dir_a();
        header.declared_len = 3;
        let err = encode(&header, b"ab", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, DropletError::PayloadLength { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn oversized_fields_rejected() {
        let mut header = dir_a();
        header.path = "x".repeat(MAX_PATH_LEN + 1);
        assert!(matches!(encode(&header, &[], &mut Vec::new()), Err(DropletError::PathTooLong { .. })));

        let mut header = dir_a();
        header.declared_len = MAX_DECLARED_LEN + 1;
        assert!(matches!(
            encode(&header, &[], &mut Vec::new()),
            Err(DropletError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn view_checks_trailer() {
        let mut out = Vec::new();
        encode(&dir_a(), &[], &mut out).unwrap();
        let d = Droplet::from_decoded(&out, 0, decode(&out, 0).unwrap());
        assert!(d.checksum_ok());
        assert_eq!(d.record_len(), 22);

        let last = out.len() - 1;
        out[last] ^= 0x01;
        let d = Droplet::from_decoded(&out, 0, decode(&out, 0).unwrap());
        assert!(!d.checksum_ok());
        assert_eq!(d.computed_checksum(), 0xc2);
        assert_eq!(d.trailer, 0xc3);
    }
}

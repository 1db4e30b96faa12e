//! Stream cursors: writer and reader.
//!
//! # Writer
//! [`DropWriter`] appends encoded droplets to any `Write` and tracks a
//! monotonic write position, starting from the archive's current length
//! when appending.  Existing bytes are never revisited: each record is
//! assembled and checksummed in a scratch buffer, then written once.
//!
//! # Reader
//! [`DropReader`] walks an in-memory (or memory-mapped) archive from offset
//! 0, decoding one droplet at a time.  A clean end of stream is the only
//! way iteration finishes without error; any fault is yielded once and the
//! reader then stops.
//!
//! # Endianness
//! Multi-byte header fields are little-endian; see `droplet.rs`.

use std::io::Write;
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::droplet::{self, Droplet, DropletHeader};
use crate::error::{DropletError, Result};

// ── Read cursor ──────────────────────────────────────────────────────────────

/// Bounds-checked read position over a byte slice.
///
/// Every read that would run past the end fails with
/// [`DropletError::StreamTruncated`] at the slice length.
#[derive(Debug, Clone)]
pub struct ReadCursor<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self) -> DropletError {
        DropletError::StreamTruncated { offset: self.data.len() as u64 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.truncated());
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u48_le(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u48(self.take(6)?))
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct DropWriter<W: Write> {
    writer:   W,
    path:     PathBuf,
    position: u64,
    records:  usize,
    scratch:  Vec<u8>,
}

impl<W: Write> DropWriter<W> {
    /// Start writing at `position`, the current length of the archive.
    pub fn new(writer: W, position: u64) -> Self {
        Self {
            writer,
            path: PathBuf::from("<archive>"),
            position,
            records: 0,
            scratch: Vec::new(),
        }
    }

    /// Name the archive in I/O errors.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Encode and write one droplet.  Returns the new stream length.
    pub fn write_droplet(&mut self, header: &DropletHeader, payload: &[u8]) -> Result<u64> {
        self.scratch.clear();
        let len = droplet::encode(header, payload, &mut self.scratch)?;
        self.writer
            .write_all(&self.scratch)
            .map_err(|e| DropletError::fs(&self.path, e))?;
        debug!(offset = self.position, len, path = %header.path, "droplet written");
        self.position += len as u64;
        self.records  += 1;
        Ok(self.position)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn records_written(&self) -> usize {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| DropletError::fs(&self.path, e))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Sequential droplet iterator over a complete archive image.
#[derive(Debug, Clone)]
pub struct DropReader<'a> {
    data:   &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> DropReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0, failed: false }
    }

    /// Offset of the next droplet to be decoded.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for DropReader<'a> {
    type Item = Result<Droplet<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }
        match droplet::decode(self.data, self.offset) {
            Ok(decoded) => {
                let record = Droplet::from_decoded(self.data, self.offset, decoded);
                debug!(
                    offset = self.offset,
                    len = record.record_len(),
                    format = %record.header.format,
                    "droplet decoded"
                );
                self.offset += record.record_len();
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for DropReader<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Format;
    use crate::permissions::Permissions;

    fn header(path: &str, declared_len: u64) -> DropletHeader {
        DropletHeader {
            format: Format::Raw8,
            permissions: Permissions::from_mode(false, 0o644),
            path: path.to_owned(),
            declared_len,
        }
    }

    #[test]
    fn cursor_reports_stream_end() {
        let mut c = ReadCursor::new(&[1, 2, 3], 1);
        assert_eq!(c.read_u16_le().unwrap(), 0x0302);
        assert!(c.is_at_end());
        let err = c.read_u8().unwrap_err();
        assert!(matches!(err, DropletError::StreamTruncated { offset: 3 }));
    }

    #[test]
    fn cursor_reads_u48() {
        let mut c = ReadCursor::new(&[0x01, 0x02, 0, 0, 0, 0x80], 0);
        assert_eq!(c.read_u48_le().unwrap(), 0x8000_0000_0201);
    }

    #[test]
    fn writer_tracks_position_from_start_offset() {
        let mut w = DropWriter::new(Vec::new(), 100);
        let end = w.write_droplet(&header("x", 2), b"hi").unwrap();
        // 14 fixed + 1 path + 6 length + 2 payload + 1 trailer
        assert_eq!(end, 124);
        assert_eq!(w.records_written(), 1);
        assert_eq!(w.into_inner().len(), 24);
    }

    #[test]
    fn reader_yields_records_then_stops() {
        let mut w = DropWriter::new(Vec::new(), 0);
        w.write_droplet(&header("a", 1), b"1").unwrap();
        w.write_droplet(&header("b", 2), b"22").unwrap();
        let data = w.into_inner();

        let paths: Vec<String> = DropReader::new(&data)
            .map(|d| d.unwrap().header.path)
            .collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn reader_stops_after_first_error() {
        let mut w = DropWriter::new(Vec::new(), 0);
        w.write_droplet(&header("a", 1), b"1").unwrap();
        let mut data = w.into_inner();
        data.push(0x00);
        data.push(0x00);

        let mut reader = DropReader::new(&data);
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(reader.next(), Some(Err(DropletError::BadMagic { offset: 23, found: 0 }))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn empty_stream_has_no_records() {
        assert_eq!(DropReader::new(&[]).count(), 0);
    }
}

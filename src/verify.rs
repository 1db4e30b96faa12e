//! Checksum verification over a whole archive.
//!
//! Verification never stops on a mismatch: each record gets a
//! [`RecordHealth`] verdict and scanning continues.  Only structural faults
//! (truncation, bad magic, bad format) abort the scan.

use std::fmt;
use std::io::{self, Write};

use serde::Serialize;
use tracing::warn;

use crate::droplet::Droplet;
use crate::error::{DropletError, Result};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordHealth {
    Correct,
    /// `stored` is the trailer byte found in the archive, `computed` the
    /// checksum of the header and payload as read.
    ChecksumMismatch { stored: u8, computed: u8 },
}

impl RecordHealth {
    pub fn is_correct(&self) -> bool {
        matches!(self, RecordHealth::Correct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedRecord {
    pub offset: u64,
    pub path:   String,
    #[serde(flatten)]
    pub health: RecordHealth,
}

impl VerifiedRecord {
    pub fn from_droplet(d: &Droplet<'_>) -> Self {
        let computed = d.computed_checksum();
        let health = if computed == d.trailer {
            RecordHealth::Correct
        } else {
            RecordHealth::ChecksumMismatch { stored: d.trailer, computed }
        };
        Self { offset: d.offset, path: d.header.path.clone(), health }
    }
}

impl fmt::Display for VerifiedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.health {
            RecordHealth::Correct => write!(f, "{} - correct hash", self.path),
            RecordHealth::ChecksumMismatch { stored, computed } => write!(
                f,
                "{} - incorrect hash 0x{computed:02x} should be 0x{stored:02x}",
                self.path
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub total:      usize,
    pub correct:    usize,
    pub mismatched: usize,
    pub records:    Vec<VerifiedRecord>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} droplet(s) verified, {} mismatch(es)",
            self.correct, self.total, self.mismatched,
        )
    }

    /// Turn any mismatch into [`DropletError::ChecksumMismatch`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(DropletError::ChecksumMismatch { mismatched: self.mismatched, total: self.total })
        }
    }

    fn record(&mut self, rec: VerifiedRecord) {
        self.total += 1;
        if rec.health.is_correct() {
            self.correct += 1;
        } else {
            self.mismatched += 1;
        }
        self.records.push(rec);
    }
}

// ── Scan ──────────────────────────────────────────────────────────────────────

pub fn verify<'a, I>(droplets: I) -> Result<VerifyReport>
where
    I: IntoIterator<Item = Result<Droplet<'a>>>,
{
    verify_each(droplets, |_| {})
}

/// Like [`verify`], calling `on_record` as each verdict is reached so callers
/// can print results while the scan is still running.
pub fn verify_each<'a, I, F>(droplets: I, mut on_record: F) -> Result<VerifyReport>
where
    I: IntoIterator<Item = Result<Droplet<'a>>>,
    F: FnMut(&VerifiedRecord),
{
    let mut report = VerifyReport::default();
    for droplet in droplets {
        let rec = VerifiedRecord::from_droplet(&droplet?);
        if let RecordHealth::ChecksumMismatch { stored, computed } = rec.health {
            warn!(
                path = %rec.path,
                offset = rec.offset,
                "checksum mismatch: stored 0x{stored:02x}, computed 0x{computed:02x}"
            );
        }
        on_record(&rec);
        report.record(rec);
    }
    Ok(report)
}

/// Verify, writing one line per record to `out` as it is checked.
///
/// The scan always runs to the end; the first write failure is returned
/// once it has.
pub fn write_lines<'a, I, W>(droplets: I, out: &mut W) -> Result<VerifyReport>
where
    I: IntoIterator<Item = Result<Droplet<'a>>>,
    W: Write,
{
    let mut write_err: Option<io::Error> = None;
    let report = verify_each(droplets, |rec| {
        if write_err.is_none() {
            if let Err(e) = writeln!(out, "{rec}") {
                write_err = Some(e);
            }
        }
    })?;
    match write_err {
        Some(e) => Err(DropletError::fs("<output>", e)),
        None    => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Format;
    use crate::droplet::DropletHeader;
    use crate::io_stream::{DropReader, DropWriter};
    use crate::permissions::Permissions;

    fn three_records() -> Vec<u8> {
        let mut w = DropWriter::new(Vec::new(), 0);
        w.write_droplet(
            &DropletHeader::directory("a", Permissions::from_mode(true, 0o755), Format::Raw8),
            &[],
        )
        .unwrap();
        for name in ["a/x", "a/y"] {
            let header = DropletHeader {
                format:       Format::Raw8,
                permissions:  Permissions::from_mode(false, 0o644),
                path:         name.to_owned(),
                declared_len: 2,
            };
            w.write_droplet(&header, b"hi").unwrap();
        }
        w.into_inner()
    }

    #[test]
    fn clean_archive() {
        let data = three_records();
        let report = verify(DropReader::new(&data)).unwrap();
        assert_eq!(report.total, 3);
        assert!(report.is_clean());
        assert_eq!(report.records[0].to_string(), "a - correct hash");
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn flipped_trailer_flags_only_that_record() {
        let mut data = three_records();
        // Second record: dir "a" is 22 bytes, "a/x" with 2 payload bytes is 25.
        let trailer = 22 + 25 - 1;
        let original = data[trailer];
        data[trailer] ^= 0xff;

        let mut seen = Vec::new();
        let report = verify_each(DropReader::new(&data), |r| seen.push(r.path.clone())).unwrap();
        assert_eq!(seen, vec!["a", "a/x", "a/y"]);
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.correct, 2);
        assert_eq!(
            report.records[1].health,
            RecordHealth::ChecksumMismatch { stored: original ^ 0xff, computed: original }
        );
        assert!(report.records[2].health.is_correct());
        assert_eq!(
            report.records[1].to_string(),
            format!("a/x - incorrect hash 0x{:02x} should be 0x{:02x}", original, original ^ 0xff)
        );

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, DropletError::ChecksumMismatch { mismatched: 1, total: 3 }));
    }

    #[test]
    fn mismatch_line_puts_computed_first() {
        let rec = VerifiedRecord {
            offset: 0,
            path:   "f".into(),
            health: RecordHealth::ChecksumMismatch { stored: 0x00, computed: 0x1a },
        };
        assert_eq!(rec.to_string(), "f - incorrect hash 0x1a should be 0x00");
    }

    #[test]
    fn lines_written_in_order() {
        let data = three_records();
        let mut out = Vec::new();
        let report = write_lines(DropReader::new(&data), &mut out).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a - correct hash\na/x - correct hash\na/y - correct hash\n"
        );
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_reported() {
        let data = three_records();
        let err = write_lines(DropReader::new(&data), &mut ClosedPipe).unwrap_err();
        match err {
            DropletError::Filesystem { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn structural_fault_aborts() {
        let mut data = three_records();
        data.truncate(data.len() - 1);
        assert!(matches!(
            verify(DropReader::new(&data)),
            Err(DropletError::StreamTruncated { .. })
        ));
    }

    #[test]
    fn report_serializes_with_status_tag() {
        let rec = VerifiedRecord {
            offset: 0,
            path:   "f".into(),
            health: RecordHealth::ChecksumMismatch { stored: 1, computed: 2 },
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["status"], "checksum_mismatch");
        assert_eq!(json["stored"], 1);
        assert_eq!(json["path"], "f");
    }
}

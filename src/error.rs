//! Crate-wide error type.
//!
//! Every decode-time fault except a checksum mismatch is fatal: the reader
//! stops at the offending record and returns one of these.  Checksum
//! mismatches are collected by [`crate::verify::VerifyReport`] and only become
//! an error through [`crate::verify::VerifyReport::into_result`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DropletError {
    /// EOF inside a record.  Once a magic byte has been consumed the rest of
    /// the record must be present.
    #[error("partially written droplet: stream ends inside the record at offset {offset}")]
    StreamTruncated { offset: u64 },

    #[error("incorrect first droplet byte at offset {offset}: 0x{found:02x} should be 0x63")]
    BadMagic { offset: u64, found: u8 },

    #[error("unknown droplet format 0x{found:02x} at offset {offset}")]
    BadFormat { offset: u64, found: u8 },

    #[error("{path}: '{}' is not a valid permission character at position {index}", *found as char)]
    InvalidPermissionChar { path: String, index: usize, found: u8 },

    #[error("symbol 0x{value:02x} is not representable in the {width}-bit format")]
    InvalidSymbol { value: u8, width: u32 },

    #[error("{mismatched} of {total} droplet(s) failed checksum verification")]
    ChecksumMismatch { mismatched: usize, total: usize },

    #[error("{path}: path is {len} bytes, longer than the 65535 a droplet can hold")]
    PathTooLong { path: String, len: usize },

    #[error("{path}: content length {len} does not fit in 48 bits")]
    ContentTooLong { path: String, len: u64 },

    #[error("{path}: payload is {actual} bytes but the header declares {expected}")]
    PayloadLength { path: String, expected: u64, actual: u64 },

    #[error("{path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("{}: {source}", path.display())]
    Filesystem {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DropletError>;

impl DropletError {
    /// Wrap a collaborator I/O failure with the path it concerns.
    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DropletError::Filesystem { path: path.into(), source }
    }
}

/// Attach a path to an `io::Result`, turning it into a [`DropletError`].
pub(crate) trait IoContext<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| DropletError::fs(path, e))
    }
}

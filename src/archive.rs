//! High-level [`Archive`] API: the primary embedding surface.
//!
//! ```no_run
//! use droplet::{build, Archive, BuildOptions, ExtractOptions};
//!
//! // Write
//! build("out.drop", &["docs"], &BuildOptions::default())?;
//!
//! // Read
//! let ar = Archive::open("out.drop")?;
//! for entry in ar.list()? {
//!     println!("{}", entry.path);
//! }
//! ar.extract_all(&ExtractOptions { dest: "restore".into() })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Every read mode runs one sequential pass over the archive image.  The
//! image is memory-mapped and must not change while an `Archive` is open.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::codec::{get_codec, Format};
use crate::droplet::Droplet;
use crate::error::{DropletError, IoContext, Result};
use crate::io_stream::DropReader;
use crate::permissions::{self, Permissions};
use crate::verify::{self, VerifyReport};

// ── ExtractOptions ───────────────────────────────────────────────────────────

/// Configuration for [`Archive::extract_all`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Record paths are resolved under this directory.
    pub dest: PathBuf,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { dest: PathBuf::from(".") }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub directories:   usize,
    pub files:         usize,
    pub bytes_written: u64,
}

// ── ListEntry ────────────────────────────────────────────────────────────────

/// Lightweight descriptor returned by [`Archive::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub path:         String,
    pub permissions:  Permissions,
    pub format:       Format,
    pub declared_len: u64,
    pub offset:       u64,
}

impl From<&Droplet<'_>> for ListEntry {
    fn from(d: &Droplet<'_>) -> Self {
        ListEntry {
            path:         d.header.path.clone(),
            permissions:  d.header.permissions,
            format:       d.header.format,
            declared_len: d.header.declared_len,
            offset:       d.offset,
        }
    }
}

impl ListEntry {
    /// `-rw-r--r--  8      2  a/f.txt`
    pub fn long_line(&self) -> String {
        format!("{}  {}  {:5}  {}", self.permissions, self.format, self.declared_len, self.path)
    }
}

// ── Archive ──────────────────────────────────────────────────────────────────

enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

pub struct Archive {
    path:   PathBuf,
    source: Source,
}

impl Archive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).at_path(&path)?;
        let len = file.metadata().at_path(&path)?.len();

        let source = if len == 0 {
            Source::Owned(Vec::new())
        } else {
            // SAFETY: mapped read-only; callers serialize access to the
            // archive file for as long as the map is alive.
            Source::Mapped(unsafe { Mmap::map(&file) }.at_path(&path)?)
        };
        debug!(path = %path.display(), len, "archive opened");
        Ok(Self { path, source })
    }

    /// Wrap an archive image already in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { path: PathBuf::from("<memory>"), source: Source::Owned(bytes) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.source {
            Source::Mapped(m) => &m[..],
            Source::Owned(v)  => v.as_slice(),
        }
    }

    /// Sequential droplet iterator; stops after the first fatal error.
    pub fn droplets(&self) -> DropReader<'_> {
        DropReader::new(self.as_bytes())
    }

    // ── List ──────────────────────────────────────────────────────────────────

    /// Every record's header, in archive order.  Payloads are skipped by
    /// their computed size and never decoded.
    pub fn list(&self) -> Result<Vec<ListEntry>> {
        self.droplets()
            .map(|d| d.map(|d| ListEntry::from(&d)))
            .collect()
    }

    // ── Verify ────────────────────────────────────────────────────────────────

    /// Recompute every record's checksum.  Mismatches are reported in the
    /// result, not returned as errors.
    pub fn verify(&self) -> Result<VerifyReport> {
        verify::verify(self.droplets())
    }

    // ── Materialize ───────────────────────────────────────────────────────────

    /// Recreate every record under `opts.dest`, creating it if necessary.
    ///
    /// Directories that already exist get their permission bits updated;
    /// files are truncated and rewritten.  A failure part-way leaves the
    /// records extracted so far in place.
    pub fn extract_all(&self, opts: &ExtractOptions) -> Result<ExtractSummary> {
        let dest = &opts.dest;
        if !dest.exists() {
            fs::create_dir_all(dest).at_path(dest)?;
        }

        let mut summary = ExtractSummary::default();
        for droplet in self.droplets() {
            let droplet = droplet?;
            let label = &droplet.header.path;
            let target = resolve_target(dest, label)?;
            // Reject bad permission bytes before touching the filesystem.
            droplet.header.permissions.mode(label)?;

            if droplet.header.is_dir() {
                info!("Creating directory: {label}");
                fs::create_dir_all(&target).at_path(&target)?;
                droplet.header.permissions.apply(&target, label)?;
                summary.directories += 1;
            } else {
                info!("Extracting: {label}");
                summary.bytes_written += extract_file(&droplet, &target)?;
                summary.files += 1;
            }
        }
        Ok(summary)
    }
}

fn extract_file(droplet: &Droplet<'_>, target: &Path) -> Result<u64> {
    let header = &droplet.header;
    let file = match File::create(target) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && target.is_file() => {
            debug!(path = %target.display(), "existing file is read-only, reopening writable");
            permissions::set_mode(target, 0o600)?;
            File::create(target)
        }
        other => other,
    }
    .at_path(target)?;
    header.permissions.apply(target, &header.path)?;

    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    get_codec(header.format)
        .decode_with(droplet.payload, header.declared_len, &mut |chunk| {
            written += chunk.len() as u64;
            out.write_all(chunk).at_path(target)
        })
        .map_err(|e| {
            error!(path = %header.path, format = %header.format, "cannot decode payload: {e}");
            e
        })?;
    out.flush().at_path(target)?;
    Ok(written)
}

/// Map a '/'-separated record path under `dest`.
///
/// Absolute paths and `..` components would escape `dest` and are refused.
fn resolve_target(dest: &Path, record: &str) -> Result<PathBuf> {
    let invalid = |reason| DropletError::InvalidPath { path: record.to_owned(), reason };

    if record.starts_with('/') {
        return Err(invalid("absolute paths are not extracted"));
    }
    let mut target = dest.to_path_buf();
    let mut depth = 0usize;
    for part in record.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(invalid("'..' components are not extracted")),
            name => {
                if Path::new(name).components().count() != 1 || Path::new(name).has_root() {
                    return Err(invalid("path component is not a plain name"));
                }
                target.push(name);
                depth += 1;
            }
        }
    }
    if depth == 0 {
        return Err(invalid("empty path"));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::droplet::{encode, DropletHeader};

    fn image(records: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (path, perms, data) in records {
            let mut bytes = [0u8; 10];
            bytes.copy_from_slice(perms.as_bytes());
            let header = DropletHeader {
                format:       Format::Raw8,
                permissions:  Permissions::from_bytes(bytes),
                path:         (*path).to_owned(),
                declared_len: data.len() as u64,
            };
            encode(&header, data, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn list_in_archive_order() {
        let ar = Archive::from_bytes(image(&[
            ("a", "drwxr-xr-x", b""),
            ("a/f.txt", "-rw-r--r--", b"hi"),
        ]));
        let entries = ar.list().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["a", "a/f.txt"]);
        assert_eq!(entries[1].long_line(), "-rw-r--r--  8      2  a/f.txt");
        assert_eq!(entries[1].offset, 22);
    }

    #[test]
    fn list_fails_without_partial_results() {
        let mut bytes = image(&[("a", "drwxr-xr-x", b"")]);
        bytes.push(0x63);
        let err = Archive::from_bytes(bytes).list().unwrap_err();
        assert!(matches!(err, DropletError::StreamTruncated { offset: 23 }));
    }

    #[test]
    fn empty_archive_lists_nothing() {
        assert!(Archive::from_bytes(Vec::new()).list().unwrap().is_empty());
    }

    #[test]
    fn resolve_rejects_escapes() {
        let dest = Path::new("/tmp/out");
        assert_eq!(resolve_target(dest, "a/./b").unwrap(), dest.join("a").join("b"));
        assert!(resolve_target(dest, "/etc/passwd").is_err());
        assert!(resolve_target(dest, "a/../../x").is_err());
        assert!(resolve_target(dest, "").is_err());
        assert!(resolve_target(dest, "./").is_err());
    }

    #[test]
    fn extract_rejects_bad_permissions_before_writing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ar = Archive::from_bytes(image(&[("f", "-rwzr--r--", b"x")]));
        let err = ar.extract_all(&ExtractOptions { dest: tmp.path().to_path_buf() }).unwrap_err();
        assert!(matches!(err, DropletError::InvalidPermissionChar { index: 3, found: b'z', .. }));
        assert!(!tmp.path().join("f").exists());
    }
}

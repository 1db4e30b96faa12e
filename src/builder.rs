//! Archive builder: turns filesystem subtrees into droplets.
//!
//! For each root the builder first records every directory leading up to it
//! (`a/b/c` records `a`, then `a/b`), then walks the root depth-first: a
//! directory record precedes its children, which appear in whatever order
//! the filesystem enumerates them.
//!
//! File contents are encoded with the codec of the chosen format, so the
//! packed formats only accept files whose bytes the format can represent.
//! Declared length is always the source byte count.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::codec::{get_codec, Codec, Format};
use crate::droplet::DropletHeader;
use crate::error::{DropletError, IoContext, Result};
use crate::io_stream::DropWriter;
use crate::permissions::Permissions;

// ── BuildOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub format:   Format,
    /// Append after the existing records instead of truncating.
    pub append:   bool,
    /// Roots are resolved against this directory; recorded paths stay
    /// relative to it.
    pub base_dir: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            format:   Format::Raw8,
            append:   false,
            base_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub directories:   usize,
    pub files:         usize,
    /// Bytes appended by this build.
    pub bytes_written: u64,
    /// Archive length once the build finished.
    pub archive_len:   u64,
}

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct Builder<W: Write> {
    writer:   DropWriter<W>,
    codec:    Box<dyn Codec>,
    base_dir: PathBuf,
    start:    u64,
    summary:  BuildSummary,
}

impl<W: Write> Builder<W> {
    pub fn new(writer: DropWriter<W>, opts: &BuildOptions) -> Self {
        let start = writer.position();
        Self {
            writer,
            codec: get_codec(opts.format),
            base_dir: opts.base_dir.clone(),
            start,
            summary: BuildSummary::default(),
        }
    }

    /// Record `root`, its ancestors, and everything beneath it.
    pub fn add_root(&mut self, root: &Path) -> Result<()> {
        let label = root.display().to_string();
        let mut disk = self.base_dir.clone();
        let mut names: Vec<&str> = Vec::new();
        let mut steps: Vec<(PathBuf, String)> = Vec::new();

        for component in root.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    disk.push(component.as_os_str());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(DropletError::InvalidPath {
                        path:   label,
                        reason: "'..' components cannot be archived",
                    });
                }
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| DropletError::InvalidPath {
                        path:   label.clone(),
                        reason: "path is not valid UTF-8",
                    })?;
                    disk.push(name);
                    names.push(name);
                    steps.push((disk.clone(), names.join("/")));
                }
            }
        }
        if root.has_root() {
            warn!("Removing leading '/' from {label}");
        }

        let Some((root_disk, root_record)) = steps.pop() else {
            // The root is the base directory itself: archive its contents.
            return self.walk(&disk, "");
        };
        for (ancestor, record) in steps {
            let meta = fs::metadata(&ancestor).at_path(&ancestor)?;
            self.add_directory(record, &meta)?;
        }
        self.walk(&root_disk, &root_record)
    }

    fn walk(&mut self, disk_root: &Path, record_root: &str) -> Result<()> {
        for entry in WalkDir::new(disk_root).follow_links(true) {
            let entry = entry.map_err(|e| walk_error(e, disk_root))?;
            let record = match relative_record(entry.path(), disk_root)? {
                rel if rel.is_empty() && record_root.is_empty() => continue,
                rel if rel.is_empty() => record_root.to_owned(),
                rel if record_root.is_empty() => rel,
                rel => format!("{record_root}/{rel}"),
            };
            let meta = entry.metadata().map_err(|e| walk_error(e, disk_root))?;
            if meta.is_dir() {
                self.add_directory(record, &meta)?;
            } else {
                self.add_file(entry.path(), record, &meta)?;
            }
        }
        Ok(())
    }

    fn add_directory(&mut self, record: String, meta: &fs::Metadata) -> Result<()> {
        info!("Adding: {record}");
        let header = DropletHeader::directory(record, Permissions::from_metadata(meta), self.codec.format());
        self.writer.write_droplet(&header, &[])?;
        self.summary.directories += 1;
        Ok(())
    }

    fn add_file(&mut self, disk: &Path, record: String, meta: &fs::Metadata) -> Result<()> {
        info!("Adding: {record}");
        let data = fs::read(disk).at_path(disk)?;
        let payload = self.codec.encode(&data).map_err(|e| {
            error!(path = %record, format = %self.codec.format(), "cannot encode file: {e}");
            e
        })?;
        let header = DropletHeader {
            format:       self.codec.format(),
            permissions:  Permissions::from_metadata(meta),
            path:         record,
            declared_len: data.len() as u64,
        };
        self.writer.write_droplet(&header, &payload)?;
        self.summary.files += 1;
        Ok(())
    }

    /// Flush the underlying writer and hand it back with the summary.
    pub fn finish(mut self) -> Result<(W, BuildSummary)> {
        self.writer.flush()?;
        let mut summary = self.summary;
        summary.archive_len   = self.writer.position();
        summary.bytes_written = summary.archive_len - self.start;
        Ok((self.writer.into_inner(), summary))
    }
}

/// `path` relative to `root`, '/'-joined.  Empty for `root` itself.
fn relative_record(path: &Path, root: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(name) = component {
            parts.push(name.to_str().ok_or_else(|| DropletError::InvalidPath {
                path:   path.display().to_string(),
                reason: "path is not valid UTF-8",
            })?);
        }
    }
    Ok(parts.join("/"))
}

fn walk_error(e: walkdir::Error, root: &Path) -> DropletError {
    let path = e.path().unwrap_or(root).to_path_buf();
    let source = e
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop detected"));
    DropletError::fs(path, source)
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Write droplets for `roots` into the archive at `archive`.
///
/// With `opts.append` the new droplets follow the existing ones, which are
/// left untouched; otherwise the archive is truncated first.
pub fn build<P, R>(archive: P, roots: &[R], opts: &BuildOptions) -> Result<BuildSummary>
where
    P: AsRef<Path>,
    R: AsRef<Path>,
{
    let archive = archive.as_ref();
    let file: File = OpenOptions::new()
        .create(true)
        .write(true)
        .append(opts.append)
        .truncate(!opts.append)
        .open(archive)
        .at_path(archive)?;
    let start = file.metadata().at_path(archive)?.len();

    let writer = DropWriter::new(BufWriter::new(file), start).with_path(archive);
    let mut builder = Builder::new(writer, opts);
    for root in roots {
        builder.add_root(root.as_ref())?;
    }
    let (_, summary) = builder.finish()?;
    info!(
        directories = summary.directories,
        files = summary.files,
        bytes = summary.bytes_written,
        "built {}",
        archive.display()
    );
    Ok(summary)
}

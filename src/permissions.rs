//! The 10-byte permission field: a type flag followed by three `rwx` groups.
//!
//! ```text
//! [0]    'd' directory | '-' file
//! [1..4] owner  r w x   ('-' when unset)
//! [4..7] group  r w x
//! [7..]  other  r w x
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Serialize, Serializer};

use crate::error::{DropletError, IoContext, Result};

pub const PERMISSIONS_LEN: usize = 10;

const SLOT_CHARS: &[u8; 3] = b"rwx";

/// Raw permission bytes as stored in a droplet header.  Not validated until
/// [`Permissions::mode`] is called.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions([u8; PERMISSIONS_LEN]);

impl Permissions {
    pub const fn from_bytes(bytes: [u8; PERMISSIONS_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; PERMISSIONS_LEN] {
        &self.0
    }

    /// Build from a directory flag and the low nine mode bits.
    pub fn from_mode(is_dir: bool, mode: u32) -> Self {
        let mut bytes = [b'-'; PERMISSIONS_LEN];
        if is_dir {
            bytes[0] = b'd';
        }
        for (i, slot) in bytes[1..].iter_mut().enumerate() {
            if mode & (0o400 >> i) != 0 {
                *slot = SLOT_CHARS[i % 3];
            }
        }
        Self(bytes)
    }

    #[cfg(unix)]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::PermissionsExt;
        Self::from_mode(meta.is_dir(), meta.permissions().mode())
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let mode = match (meta.is_dir(), meta.permissions().readonly()) {
            (true, false)  => 0o755,
            (true, true)   => 0o555,
            (false, false) => 0o644,
            (false, true)  => 0o444,
        };
        Self::from_mode(meta.is_dir(), mode)
    }

    pub fn is_dir(&self) -> bool {
        self.0[0] == b'd'
    }

    /// Validate every byte and return the nine permission bits.
    ///
    /// `path` is only used to label the error.
    pub fn mode(&self, path: &str) -> Result<u32> {
        let invalid = |index: usize| DropletError::InvalidPermissionChar {
            path: path.to_owned(),
            index,
            found: self.0[index],
        };

        if !matches!(self.0[0], b'd' | b'-') {
            return Err(invalid(0));
        }
        let mut mode = 0u32;
        for (i, &c) in self.0[1..].iter().enumerate() {
            if c == SLOT_CHARS[i % 3] {
                mode |= 0o400 >> i;
            } else if c != b'-' {
                return Err(invalid(i + 1));
            }
        }
        Ok(mode)
    }

    /// Set these bits on `target`.
    pub fn apply(&self, target: &Path, label: &str) -> Result<()> {
        let mode = self.mode(label)?;
        set_mode(target, mode)
    }
}

#[cfg(unix)]
pub(crate) fn set_mode(target: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, fs::Permissions::from_mode(mode)).at_path(target)
}

#[cfg(not(unix))]
pub(crate) fn set_mode(target: &Path, mode: u32) -> Result<()> {
    let mut perms = fs::metadata(target).at_path(target)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(target, perms).at_path(target)
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({self})")
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

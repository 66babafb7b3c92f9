//! Fixed-capacity path buffers.
//!
//! Every path that crosses the wire or gets copied into a work item is a
//! fixed-size, null-terminated byte buffer (`PATH_MAX` octets) rather than a
//! heap `String`. `FmPath` is the single construction point that enforces
//! truncation and null-termination, replacing the ad-hoc
//! `strncpy`-plus-force-terminate calls of the upstream C implementation.

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Maximum path length, including the null terminator, for any path carried
/// in a command packet or work item.
pub const PATH_MAX: usize = 64;

/// A fixed-capacity, always null-terminated path buffer.
#[derive(Clone, Copy)]
pub struct FmPath {
    buf: [u8; PATH_MAX],
    len: usize,
}

impl FmPath {
    /// An empty path (zero-length, still null-terminated).
    pub const fn empty() -> Self {
        FmPath {
            buf: [0u8; PATH_MAX],
            len: 0,
        }
    }

    /// Build a path from raw bytes, truncating to `PATH_MAX - 1` octets and
    /// always re-terminating. This is the only way to build a non-empty
    /// `FmPath`; there is no way to construct one that is not null-terminated.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; PATH_MAX];
        let copy_len = bytes.len().min(PATH_MAX - 1);
        buf[..copy_len].copy_from_slice(&bytes[..copy_len]);
        FmPath { buf, len: copy_len }
    }

    /// Build from a `&str`.
    pub fn from_str(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Length in octets, not counting the null terminator.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if this path carries no characters (the `NOT_IN_USE` case for a
    /// volume-table slot, or an unset optional path field on a work item).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The path bytes, not including the null terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The full fixed-size, zero-padded buffer, suitable for embedding
    /// directly into a [`crate::packet`] wire row.
    pub fn as_raw(&self) -> [u8; PATH_MAX] {
        self.buf
    }

    /// Invariant check: the buffer is always null-terminated at `PATH_MAX - 1`
    /// at the latest, and at `len` in practice.
    pub fn is_null_terminated(&self) -> bool {
        self.buf[PATH_MAX - 1] == 0 && self.buf[self.len] == 0
    }

    /// View as `&Path` for handing to the OS shim.
    pub fn as_path(&self) -> &Path {
        Path::new(OsStr::from_bytes(self.as_bytes()))
    }

    /// View as `&str`, if the bytes happen to be valid UTF-8 (true for every
    /// path this crate constructs internally; the wire format has no
    /// encoding guarantee, so callers that need to handle arbitrary bytes
    /// should prefer [`FmPath::as_bytes`]).
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    /// Append a child name, inserting the platform separator if `self`
    /// doesn't already end with one. Used by `DELETE_ALL`'s "raw plus
    /// with-separator" dual enqueue (spec §4.3).
    pub fn with_trailing_separator(&self) -> Self {
        if self.len == 0 || self.buf[self.len - 1] == b'/' {
            *self
        } else {
            let mut out = *self;
            if out.len < PATH_MAX - 1 {
                out.buf[out.len] = b'/';
                out.len += 1;
                out.buf[out.len] = 0;
            }
            out
        }
    }
}

impl From<&Path> for FmPath {
    fn from(p: &Path) -> Self {
        FmPath::from_bytes(p.as_os_str().as_bytes())
    }
}

impl From<&FmPath> for PathBuf {
    fn from(p: &FmPath) -> Self {
        p.as_path().to_path_buf()
    }
}

impl fmt::Debug for FmPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FmPath({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Display for FmPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl Default for FmPath {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for FmPath {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
impl Eq for FmPath {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_and_terminates() {
        let long = "a".repeat(PATH_MAX + 10);
        let p = FmPath::from_str(&long);
        assert_eq!(p.len(), PATH_MAX - 1);
        assert!(p.is_null_terminated());
    }

    #[test]
    fn empty_is_null_terminated() {
        let p = FmPath::empty();
        assert!(p.is_empty());
        assert!(p.is_null_terminated());
    }

    #[test]
    fn trailing_separator_added_once() {
        let p = FmPath::from_str("/ram/dir");
        let with_sep = p.with_trailing_separator();
        assert_eq!(with_sep.as_str().unwrap(), "/ram/dir/");
        let idempotent = with_sep.with_trailing_separator();
        assert_eq!(idempotent.as_str().unwrap(), "/ram/dir/");
    }

    #[test]
    fn roundtrip_through_path() {
        let p = FmPath::from_str("/ram/a.txt");
        assert_eq!(p.as_path(), Path::new("/ram/a.txt"));
    }
}

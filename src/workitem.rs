//! The handshake queue's payload type.
//!
//! spec.md's Design Notes call out that the upstream implementation shares
//! one work-item record across every opcode, zeroing the fields a given
//! handler doesn't use. Here each variant carries exactly the fields its
//! executor needs, the same way `ll::Operation` in the teacher crate's
//! `src/ll/request.rs` is a tagged enum over the FUSE opcodes rather than
//! one flat struct.

use crate::opcode::Opcode;
use crate::path::FmPath;

/// Whether a directory-listing / file-info executor should additionally
/// stat each entry (costing a syscall per entry) or leave size/mtime zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTimeMode {
    /// Leave size/mtime zero.
    NameOnly,
    /// Stat every entry to fill size/mtime.
    QueryFs,
}

impl SizeTimeMode {
    /// Decode the wire's `0`/`1` encoding.
    pub fn from_wire(v: u32) -> Self {
        if v == 0 {
            SizeTimeMode::NameOnly
        } else {
            SizeTimeMode::QueryFs
        }
    }
}

/// A single unit of work handed from the command processor to the child
/// worker. Each variant is exactly what spec.md §3 calls a populated work
/// item: the fields the corresponding executor in §4.5 needs, nothing more.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// Copy `source` to `target`.
    Copy { source: FmPath, target: FmPath },
    /// Move `source` to `target`.
    Move { source: FmPath, target: FmPath },
    /// Rename `source` to `target`.
    Rename { source: FmPath, target: FmPath },
    /// Delete `path`. `internal` preserves the upstream behavior of
    /// forwarding the raw function code for an "internal delete" path
    /// (spec.md §9 Open Question; see DESIGN.md for the resolution).
    Delete { path: FmPath, internal: bool },
    /// Delete every entry under `directory`. The processor enqueues both the
    /// raw and separator-appended forms (spec.md §4.3).
    DeleteAll { directory: FmPath },
    /// Decompress `source` into `target`.
    #[cfg(feature = "decompress")]
    Decompress { source: FmPath, target: FmPath },
    /// Concatenate `source1` then `source2` into `target`.
    Concat {
        source1: FmPath,
        source2: FmPath,
        target: FmPath,
    },
    /// Fetch file info for `path`; `cached_size`/`cached_mtime`/`cached_mode`
    /// were already captured by the `name-valid` validator, `crc_kind`
    /// selects which checksum (if any) the worker should compute.
    GetFileInfo {
        path: FmPath,
        cached_size: u64,
        cached_mtime: u64,
        cached_mode: u32,
        crc_kind: u32,
    },
    /// Create `directory`.
    CreateDir { directory: FmPath },
    /// Delete `directory`.
    DeleteDir { directory: FmPath },
    /// List `directory` into the file `target` (defaulted by the processor
    /// if the caller left it empty).
    GetDirFile {
        directory: FmPath,
        target: FmPath,
        mode: SizeTimeMode,
    },
    /// List `directory` into a telemetry packet starting at `offset`.
    GetDirPkt {
        directory: FmPath,
        offset: u32,
        mode: SizeTimeMode,
    },
    /// Change `path`'s permission bits to `mode`.
    SetFilePerm { path: FmPath, mode: u32 },
}

impl WorkItem {
    /// The opcode this item executes as, for Last-CC telemetry.
    pub fn opcode(&self) -> Opcode {
        match self {
            WorkItem::Copy { .. } => Opcode::Copy,
            WorkItem::Move { .. } => Opcode::Move,
            WorkItem::Rename { .. } => Opcode::Rename,
            WorkItem::Delete { .. } => Opcode::Delete,
            WorkItem::DeleteAll { .. } => Opcode::DeleteAll,
            #[cfg(feature = "decompress")]
            WorkItem::Decompress { .. } => Opcode::Decompress,
            WorkItem::Concat { .. } => Opcode::Concat,
            WorkItem::GetFileInfo { .. } => Opcode::GetFileInfo,
            WorkItem::CreateDir { .. } => Opcode::CreateDir,
            WorkItem::DeleteDir { .. } => Opcode::DeleteDir,
            WorkItem::GetDirFile { .. } => Opcode::GetDirFile,
            WorkItem::GetDirPkt { .. } => Opcode::GetDirPkt,
            WorkItem::SetFilePerm { .. } => Opcode::SetFilePerm,
        }
    }
}

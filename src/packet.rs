//! Wire packet layouts.
//!
//! Every command and telemetry packet has a fixed-size, byte-exact layout so
//! that a packet-length mismatch (spec.md §4.2 "packet length" validator) is
//! a simple `size_of` comparison. These structs use `zerocopy` the same way
//! the teacher crate's `ll::fuse_abi` module derives byte-exact layouts for
//! the FUSE kernel ABI -- no hand-rolled (de)serialization.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::path::PATH_MAX;

/// Raw on-the-wire path: a fixed `PATH_MAX`-byte buffer. Decoded into an
/// [`crate::path::FmPath`] by [`crate::path::FmPath::from_bytes`] the moment
/// it is pulled off the wire.
pub type RawPath = [u8; PATH_MAX];

/// Common packet header carried by every command, housekeeping and
/// telemetry packet (the message-ID/function-code/timestamp framing is an
/// external collaborator per spec.md §1, but every packet still needs the
/// fixed-size body below it for length validation).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    /// Seconds since epoch, stamped by the packet-framing layer.
    pub seconds: u32,
    /// Sub-second component, stamped by the packet-framing layer.
    pub subseconds: u16,
    /// Reserved for alignment / future use.
    pub _reserved: u16,
}

/// `NOOP` / `RESET_COUNTERS` share this zero-argument body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct EmptyCmd {
    /// Packet header.
    pub header: PacketHeader,
}

/// `COPY` / `MOVE` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct CopyMoveCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Source file path.
    pub source: RawPath,
    /// Target file path.
    pub target: RawPath,
    /// 0 = do not overwrite an existing target, 1 = overwrite.
    pub overwrite: u8,
    /// Padding to keep the struct's size a multiple of 4.
    pub _pad: [u8; 3],
}

/// `RENAME` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct RenameCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Existing file path.
    pub source: RawPath,
    /// New file path.
    pub target: RawPath,
}

/// `DELETE` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DeleteCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// File to delete.
    pub path: RawPath,
}

/// `DELETE_ALL` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DeleteAllCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Directory whose files should all be deleted.
    pub directory: RawPath,
}

/// `DECOMPRESS` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DecompressCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Compressed source path.
    pub source: RawPath,
    /// Decompressed target path.
    pub target: RawPath,
}

/// `CONCAT` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct ConcatCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// First source path.
    pub source1: RawPath,
    /// Second source path.
    pub source2: RawPath,
    /// Output path.
    pub target: RawPath,
}

/// `GET_FILE_INFO` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct GetFileInfoCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Path to describe.
    pub path: RawPath,
    /// Caller-supplied CRC algorithm selector (0 = none).
    pub crc_kind: u32,
}

/// `GET_OPEN_FILES` command body (no arguments beyond the header).
pub type GetOpenFilesCmd = EmptyCmd;

/// `CREATE_DIR` / `DELETE_DIR` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DirCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Directory path.
    pub directory: RawPath,
}

/// `GET_DIR_FILE` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct GetDirFileCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Directory to list.
    pub directory: RawPath,
    /// Output file; if empty, the worker fills in a default name.
    pub target: RawPath,
    /// 0 = leave size/mtime zero, 1 = stat each entry (`QUERY_FS`).
    pub get_size_time_mode: u32,
}

/// `GET_DIR_PKT` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct GetDirPktCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Directory to list.
    pub directory: RawPath,
    /// Number of entries to skip before filling the packet.
    pub dir_list_offset: u32,
    /// 0 = leave size/mtime zero, 1 = stat each entry (`QUERY_FS`).
    pub get_size_time_mode: u32,
}

/// `GET_FREE_SPACE` command body (no arguments beyond the header).
pub type GetFreeSpaceCmd = EmptyCmd;

/// `SET_TABLE_STATE` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SetTableStateCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// Index into the volume table.
    pub table_entry_index: u32,
    /// Requested new state (1 = enabled, 2 = disabled).
    pub new_state: u32,
}

/// `SET_FILE_PERM` command body.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SetFilePermCmd {
    /// Packet header.
    pub header: PacketHeader,
    /// File to modify.
    pub path: RawPath,
    /// New permission bits.
    pub mode: u32,
}

/// One row of the open-files telemetry packet.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, KnownLayout, Immutable)]
pub struct OpenFileRow {
    /// Owning task name.
    pub task_name: RawPath,
    /// Open file path.
    pub file_name: RawPath,
}

/// One row of the directory-listing telemetry packet / file.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, KnownLayout, Immutable)]
pub struct DirListRow {
    /// Entry name.
    pub name: RawPath,
    /// Size in bytes; zero unless `QUERY_FS` mode was requested.
    pub size: u64,
    /// Modification time (Unix seconds); zero unless `QUERY_FS` mode.
    pub mtime: u64,
}

/// One row of the free-space telemetry packet.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, KnownLayout, Immutable)]
pub struct FreeSpaceRow {
    /// Volume name.
    pub name: RawPath,
    /// Free blocks, or zero if the stat failed.
    pub blocks_free: u64,
}

/// Directory-list-to-file header, back-patched after streaming completes
/// (spec.md §6 "Directory list to file").
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DirListFileHeader {
    /// Directory that was listed.
    pub dir_name: RawPath,
    /// Total entries found (written after the stream completes).
    pub total_entries: u32,
    /// Entries actually written to the file.
    pub written_entries: u32,
}

/// One record of the persisted volume config table (spec.md §6, "Volume
/// config table").
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct TableRecord {
    /// Raw slot state (`0 = unused, 1 = enabled, 2 = disabled`).
    pub state: u32,
    /// Volume name.
    pub name: RawPath,
}

/// Housekeeping telemetry header (spec.md §6). Carries the full counter
/// snapshot plus queue depth, Last-CC and the table lifecycle counters;
/// there are no variable-length rows following it.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct HkTelemetryHeader {
    /// Successful synchronous commands / successful enqueues.
    pub cmd_ok: u32,
    /// Rejected commands.
    pub cmd_err: u32,
    /// Work items the worker completed successfully.
    pub child_ok: u32,
    /// Work items the worker abandoned due to a fatal fault.
    pub child_err: u32,
    /// Work items that hit a recoverable fault and continued.
    pub child_warn: u32,
    /// Current handshake queue depth.
    pub queue_count: u32,
    /// Opcode the worker is currently (or most recently) executing, or
    /// `0xff` if none yet.
    pub current_cc: u8,
    /// Opcode the worker completed just before `current_cc`, or `0xff`.
    pub previous_cc: u8,
    /// Padding to keep the struct 4-byte aligned.
    pub _pad: [u8; 2],
    /// Number of currently open files.
    pub num_open_files: u32,
    /// Number of table load attempts so far.
    pub table_load_count: u32,
    /// Number of table validation passes so far.
    pub table_validate_count: u32,
}

/// Sentinel written into [`HkTelemetryHeader::current_cc`] /
/// `previous_cc` when no opcode has run yet.
pub const NO_CC: u8 = 0xff;

/// Open-files telemetry header, followed by `num_open_files.min(capacity)`
/// [`OpenFileRow`]s (spec.md §6 "no silent caps": the header always carries
/// the true count even when the row array was truncated).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct OpenFilesTelemetryHeader {
    /// True number of open files, independent of how many rows follow.
    pub num_open_files: u32,
}

/// Directory-listing telemetry header, followed by `returned_entries`
/// [`DirListRow`]s (spec.md §6 "Directory list to packet").
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DirListTelemetryHeader {
    /// Directory that was listed.
    pub directory: RawPath,
    /// Total entries found in the directory.
    pub total_entries: u32,
    /// Entries actually included in this packet.
    pub returned_entries: u32,
}

/// Free-space telemetry header, followed by `row_count` [`FreeSpaceRow`]s
/// (spec.md §6 "Free space").
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct FreeSpaceTelemetryHeader {
    /// Number of rows following this header.
    pub row_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn copy_move_cmd_is_packed() {
        // Packet-length validation relies on this being a stable, exact size.
        assert_eq!(
            size_of::<CopyMoveCmd>(),
            size_of::<PacketHeader>() + 2 * PATH_MAX + 4
        );
    }
}

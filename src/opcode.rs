//! Command packet message IDs and function codes.

use num_enum::TryFromPrimitive;

/// Message IDs that this service subscribes to on the command bus.
///
/// Mirrors the two message IDs from spec.md §6: housekeeping requests are
/// distinct from operational commands, and the main loop classifies on
/// this rather than folding everything into one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    /// Housekeeping request, published on a schedule by the host.
    SendHk,
    /// An operational command packet, carrying one of [`Opcode`].
    Cmd,
}

/// Function codes carried by a `CMD_MID` packet.
///
/// `Decompress` is compile-time optional: it and its executor are absent
/// entirely when the `decompress` Cargo feature is disabled (spec.md §9,
/// "compile-time optional decompress").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// No-op; replies with version information.
    Noop = 0,
    /// Reset all six counters (queue gauge untouched).
    ResetCounters = 1,
    /// Copy a file.
    Copy = 2,
    /// Move a file.
    Move = 3,
    /// Rename a file.
    Rename = 4,
    /// Delete a single file.
    Delete = 5,
    /// Delete every file in a directory.
    DeleteAll = 6,
    /// Decompress a file. Present only when the `decompress` feature is on.
    #[cfg(feature = "decompress")]
    Decompress = 7,
    /// Concatenate two files into a third.
    Concat = 8,
    /// Fetch cached size/mtime/mode (and optionally CRC) for a path.
    GetFileInfo = 9,
    /// Synchronous: report every currently open file.
    GetOpenFiles = 10,
    /// Create a directory.
    CreateDir = 11,
    /// Delete a directory.
    DeleteDir = 12,
    /// Write a directory listing to a file.
    GetDirFile = 13,
    /// Write a directory listing to a telemetry packet.
    GetDirPkt = 14,
    /// Synchronous: report free space for every enabled volume.
    GetFreeSpace = 15,
    /// Synchronous: flip a volume-table slot between enabled/disabled.
    SetTableState = 16,
    /// Change a file's permission bits.
    SetFilePerm = 17,
}

impl Opcode {
    /// True for opcodes dispatched synchronously by the command processor
    /// (spec.md §4.3): these never enqueue a work item.
    pub fn is_synchronous(self) -> bool {
        matches!(
            self,
            Opcode::Noop
                | Opcode::ResetCounters
                | Opcode::GetOpenFiles
                | Opcode::GetFreeSpace
                | Opcode::SetTableState
        )
    }
}

/// Internal function code used for the worker-side delete path.
///
/// spec.md's Open Question: the upstream `DELETE` handler forwards the raw
/// function code from the incoming packet header instead of a constant,
/// which lets an "internal delete" path reuse the same executor under a
/// distinct code not present in the public opcode list above. DESIGN.md
/// records the decision to preserve this as an explicit, separate constant
/// rather than threading a raw byte through the work item.
pub const INTERNAL_DELETE_FUNCTION_CODE: u8 = 0x80;

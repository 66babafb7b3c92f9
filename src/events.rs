//! Event emission.
//!
//! Every rejection, worker failure and successful mutation emits an event
//! with a stable numeric ID and a short descriptive string (spec.md §6).
//! Event IDs are grouped per opcode with a base ID and per-reason offsets,
//! the same grouping the upstream C event table uses; this crate routes
//! them through the `log` crate the way the teacher crate logs every FUSE
//! request (`debug!("{}", self.request)` in `src/request.rs`), at a level
//! that matches severity.

use log::{debug, error, info, warn};

use crate::opcode::Opcode;

/// Severity of an emitted event, mirroring the four event types FM tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Lifecycle / informational (NOOP replies, successful synchronous commands).
    Information,
    /// Debug-only detail (worker per-item success).
    Debug,
    /// Recoverable fault; processing continues.
    Warning,
    /// Fatal fault for this command or work item.
    Error,
}

/// Base event ID for a given opcode's event group. Per-reason offsets are
/// added by callers (e.g. `base(Opcode::Copy) + 1` for "source does not
/// exist", `+ 2` for "target exists without overwrite").
pub fn base_eid(opcode: Opcode) -> u32 {
    1000 + (opcode as u32) * 100
}

/// Event ID for conditions not tied to a single opcode (bus errors, init
/// failures, unknown opcodes).
pub const EID_UNKNOWN_OPCODE: u32 = 1;
/// Event ID for a bus receive error (terminal).
pub const EID_BUS_ERROR: u32 = 2;
/// Event ID for the final exit event.
pub const EID_EXIT: u32 = 3;
/// Event ID for an initialization failure.
pub const EID_INIT_FAILURE: u32 = 4;
/// Event ID for the table validator's per-load INFORMATION summary
/// (spec.md §4.6).
pub const EID_TABLE_VALIDATE_SUMMARY: u32 = 5;
/// Event ID for the first empty-name row the table validator finds.
pub const EID_TABLE_EMPTY_NAME: u32 = 6;
/// Event ID for the first too-long (unterminated) name row the table
/// validator finds.
pub const EID_TABLE_NAME_TOO_LONG: u32 = 7;
/// Event ID for the first invalid-state row the table validator finds.
pub const EID_TABLE_INVALID_STATE: u32 = 8;

/// Emit one event. `eid` is included in the formatted message so event IDs
/// stay correlatable in whatever downstream log sink aggregates them.
pub fn emit(severity: Severity, eid: u32, message: &str) {
    match severity {
        Severity::Information => info!("[EID {eid}] {message}"),
        Severity::Debug => debug!("[EID {eid}] {message}"),
        Severity::Warning => warn!("[EID {eid}] {message}"),
        Severity::Error => error!("[EID {eid}] {message}"),
    }
}

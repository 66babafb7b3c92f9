//! Telemetry packet assembly (spec.md §4.7 and §6).
//!
//! Builds the four output packet types from live service state. Each
//! builder returns a plain Rust struct; callers hand it to
//! [`crate::bus::MessageBus::publish_telemetry`] as bytes via `zerocopy`.

use zerocopy::IntoBytes as _;

use crate::counters::CounterSnapshot;
use crate::opcode::Opcode;
use crate::osshim::OpenFileEntry;
use crate::packet::{
    DirListTelemetryHeader, FreeSpaceTelemetryHeader, HkTelemetryHeader, OpenFilesTelemetryHeader,
    NO_CC,
};
use crate::path::FmPath;

fn opcode_to_wire(opcode: Option<Opcode>) -> u8 {
    opcode.map(|o| o as u8).unwrap_or(NO_CC)
}

/// Housekeeping telemetry: the full counter snapshot plus queue depth,
/// Last-CC, open-file count, and the table lifecycle counters SPEC_FULL
/// adds (§3 supplement).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HkTelemetry {
    /// Snapshot of the six counters (minus the queue gauge, listed separately).
    pub counters: CounterSnapshot,
    /// Current handshake queue depth.
    pub queue_count: u32,
    /// Opcode the worker is currently (or most recently) executing.
    pub current_cc: Option<Opcode>,
    /// Opcode the worker completed just before `current_cc`.
    pub previous_cc: Option<Opcode>,
    /// Cheap probe of how many files are currently open (no list materialized).
    pub num_open_files: u32,
    /// Number of table load attempts so far.
    pub table_load_count: u32,
    /// Number of table validation passes so far.
    pub table_validate_count: u32,
}

impl HkTelemetry {
    /// Serialize to the fixed-size wire header (spec.md §6); there are no
    /// rows following housekeeping telemetry.
    pub fn to_wire(&self) -> Vec<u8> {
        let header = HkTelemetryHeader {
            cmd_ok: self.counters.cmd_ok,
            cmd_err: self.counters.cmd_err,
            child_ok: self.counters.child_ok,
            child_err: self.counters.child_err,
            child_warn: self.counters.child_warn,
            queue_count: self.queue_count,
            current_cc: opcode_to_wire(self.current_cc),
            previous_cc: opcode_to_wire(self.previous_cc),
            _pad: [0; 2],
            num_open_files: self.num_open_files,
            table_load_count: self.table_load_count,
            table_validate_count: self.table_validate_count,
        };
        header.as_bytes().to_vec()
    }
}

/// Open-files telemetry: one row per currently open file.
#[derive(Debug, Clone, Default)]
pub struct OpenFilesTelemetry {
    /// How many files are open (same as `HkTelemetry::num_open_files`, kept
    /// alongside the array so a truncated array is still observable).
    pub num_open_files: u32,
    /// The (possibly truncated) rows.
    pub files: Vec<OpenFileEntry>,
}

/// Build the open-files telemetry packet by probing the OS shim for every
/// open handle (spec.md §4.3 `GET_OPEN_FILES`).
pub fn build_open_files_telemetry(
    os: &dyn crate::osshim::OsShim,
    max_rows: usize,
) -> OpenFilesTelemetry {
    let all = os.open_files();
    OpenFilesTelemetry {
        num_open_files: all.len() as u32,
        files: all.into_iter().take(max_rows).collect(),
    }
}

impl OpenFilesTelemetry {
    /// Serialize to the wire header followed by one row per (possibly
    /// truncated) entry in `files`.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = OpenFilesTelemetryHeader {
            num_open_files: self.num_open_files,
        }
        .as_bytes()
        .to_vec();
        for file in &self.files {
            let row = crate::packet::OpenFileRow {
                task_name: FmPath::from_str(&file.task_name).as_raw(),
                file_name: FmPath::from_str(&file.file_name).as_raw(),
            };
            out.extend_from_slice(row.as_bytes());
        }
        out
    }
}

/// One row of the directory-listing telemetry packet / file.
#[derive(Debug, Clone, PartialEq)]
pub struct DirListRow {
    /// Entry name.
    pub name: String,
    /// Size in bytes; zero unless `QUERY_FS` mode.
    pub size: u64,
    /// Modification time; zero unless `QUERY_FS` mode.
    pub mtime: u64,
}

/// Directory-listing telemetry packet: directory name, total entry count,
/// returned entry count, and the rows themselves (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub struct DirListTelemetry {
    /// Directory that was listed.
    pub directory: String,
    /// Total entries in the directory.
    pub total_entries: u32,
    /// Entries actually returned in this packet.
    pub returned_entries: u32,
    /// The rows.
    pub rows: Vec<DirListRow>,
}

/// One row of the free-space telemetry packet.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeSpaceRow {
    /// Volume name.
    pub name: String,
    /// Free blocks, or zero if the per-row stat failed.
    pub blocks_free: u64,
}

/// Free-space telemetry: one row per `ENABLED` volume-table entry (spec.md
/// §4.3 `GET_FREE_SPACE`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreeSpaceTelemetry {
    /// The rows, in table order.
    pub rows: Vec<FreeSpaceRow>,
}

impl DirListTelemetry {
    /// Serialize to the wire header followed by one row per returned entry.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = DirListTelemetryHeader {
            directory: FmPath::from_str(&self.directory).as_raw(),
            total_entries: self.total_entries,
            returned_entries: self.returned_entries,
        }
        .as_bytes()
        .to_vec();
        for row in &self.rows {
            let wire = crate::packet::DirListRow {
                name: FmPath::from_str(&row.name).as_raw(),
                size: row.size,
                mtime: row.mtime,
            };
            out.extend_from_slice(wire.as_bytes());
        }
        out
    }
}

/// List `directory` starting at `offset`, filling at most `max_rows` entries
/// into one directory-listing telemetry packet (spec.md §4.5 `GET_DIR_PKT`).
/// `offset` past the end of the directory yields zero rows, not an error.
pub fn build_dir_list_telemetry(
    os: &dyn crate::osshim::OsShim,
    directory: &FmPath,
    offset: u32,
    mode: crate::workitem::SizeTimeMode,
    max_rows: usize,
) -> std::io::Result<DirListTelemetry> {
    use crate::workitem::SizeTimeMode;

    let names = os.read_dir_names(directory)?;
    let total_entries = names.len() as u32;
    let mut rows = Vec::new();
    for name in names.into_iter().skip(offset as usize).take(max_rows) {
        let (size, mtime) = match mode {
            SizeTimeMode::NameOnly => (0, 0),
            SizeTimeMode::QueryFs => {
                let meta = os.stat_entry(directory, &name).unwrap_or_default();
                (meta.size, meta.mtime)
            }
        };
        rows.push(DirListRow { name, size, mtime });
    }
    Ok(DirListTelemetry {
        directory: directory.to_string(),
        total_entries,
        returned_entries: rows.len() as u32,
        rows,
    })
}

/// Iterate the volume table's `ENABLED` rows, stat each one, and assemble
/// the free-space telemetry packet. A per-row stat failure reports
/// `blocks_free: 0` and emits an error event but does not abort the rest of
/// the table (spec.md §4.3).
pub fn build_free_space_telemetry(
    os: &dyn crate::osshim::OsShim,
    table: &[crate::table::TableEntry],
) -> FreeSpaceTelemetry {
    use crate::events::{emit, Severity};
    use crate::table::SlotState;

    let mut rows = Vec::new();
    for entry in table {
        if entry.state != SlotState::Enabled {
            continue;
        }
        let blocks_free = match os.stat_volume(&entry.name) {
            Ok(n) => n,
            Err(err) => {
                emit(
                    Severity::Error,
                    crate::events::base_eid(Opcode::GetFreeSpace),
                    &format!("stat_volume({}) failed: {err}", entry.name),
                );
                0
            }
        };
        rows.push(FreeSpaceRow {
            name: entry.name.to_string(),
            blocks_free,
        });
    }
    FreeSpaceTelemetry { rows }
}

impl FreeSpaceTelemetry {
    /// Serialize to the wire header followed by one row per volume.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = FreeSpaceTelemetryHeader {
            row_count: self.rows.len() as u32,
        }
        .as_bytes()
        .to_vec();
        for row in &self.rows {
            let wire = crate::packet::FreeSpaceRow {
                name: FmPath::from_str(&row.name).as_raw(),
                blocks_free: row.blocks_free,
            };
            out.extend_from_slice(wire.as_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osshim::mock::MockOsShim;
    use crate::path::FmPath;
    use crate::table::{SlotState, TableEntry};

    #[test]
    fn free_space_only_reports_enabled_rows() {
        let os = MockOsShim::new();
        os.put_volume("/ram", 100);
        os.put_volume("/cf", 200);
        let table = vec![
            TableEntry {
                state: SlotState::Enabled,
                name: FmPath::from_str("/ram"),
            },
            TableEntry {
                state: SlotState::Disabled,
                name: FmPath::from_str("/cf"),
            },
            TableEntry::unused(),
        ];
        let tlm = build_free_space_telemetry(&os, &table);
        assert_eq!(tlm.rows.len(), 1);
        assert_eq!(tlm.rows[0].name, "/ram");
        assert_eq!(tlm.rows[0].blocks_free, 100);
    }

    #[test]
    fn free_space_reports_zero_on_stat_failure() {
        let os = MockOsShim::new();
        let table = vec![TableEntry {
            state: SlotState::Enabled,
            name: FmPath::from_str("/missing"),
        }];
        let tlm = build_free_space_telemetry(&os, &table);
        assert_eq!(tlm.rows[0].blocks_free, 0);
    }
}

//! The command processor: one handler per opcode (spec.md §4.3).
//!
//! Every handler follows the template *(length -> opcode-specific
//! predicates -> queue-has-room -> populate-work-item -> publish-wake)*,
//! structurally the same `match`-per-opcode dispatch `fuser`'s
//! `Request::dispatch` in `src/request.rs` uses, just over FM's opcodes
//! instead of FUSE operations.

use std::mem::size_of;

use parking_lot::Mutex;
use zerocopy::FromBytes;

use crate::bus::MessageBus;
use crate::counters::Counters;
use crate::events::{base_eid, emit, Severity};
use crate::opcode::Opcode;
use crate::osshim::OsShim;
use crate::packet::{
    ConcatCmd, CopyMoveCmd, DecompressCmd, DeleteAllCmd, DeleteCmd, DirCmd, GetDirFileCmd,
    GetDirPktCmd, GetFileInfoCmd, GetFreeSpaceCmd, GetOpenFilesCmd, RenameCmd, SetFilePermCmd,
    SetTableStateCmd,
};
use crate::path::FmPath;
use crate::queue::HandshakeQueue;
use crate::table::{self, SlotState, TableManager};
use crate::telemetry;
use crate::validators as v;
use crate::workitem::{SizeTimeMode, WorkItem};

/// Outcome of dispatching one command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled synchronously, successfully.
    HandledOk,
    /// Enqueued for the worker.
    Enqueued,
    /// Rejected; no side effect occurred.
    Rejected,
    /// Handled synchronously (reset-counters path: does not bump `cmd_ok`).
    HandledNoCount,
}

/// Everything a command handler needs. Borrowed for the duration of one
/// `dispatch` call; none of it is processor-owned long-term except the
/// table manager, which only the main thread ever touches (spec.md §5).
pub struct Processor<'a> {
    pub os: &'a dyn OsShim,
    pub queue: &'a HandshakeQueue,
    pub counters: &'a Counters,
    pub table: &'a Mutex<TableManager>,
    pub bus: &'a dyn MessageBus,
    pub queue_depth: usize,
}

/// Decode `body` as exactly one `T`, rejecting anything but an exact-length
/// match. Grounded on the teacher crate's `ll::argument::ArgumentIterator::fetch`
/// (`src/ll/argument.rs`); unlike that helper this copies `T` out by value
/// via `FromBytes::read_from_prefix` rather than casting a `Ref` over the
/// slice in place, since the real main-loop body is `&bytes[1..]` (the
/// opcode byte stripped off an aligned buffer) and so is not itself aligned
/// to `align_of::<T>()` -- a `Ref`-based cast would spuriously fail on every
/// real command.
fn decode<T: FromBytes + zerocopy::KnownLayout + zerocopy::Immutable + Copy>(body: &[u8]) -> Option<T> {
    let (value, rest) = T::read_from_prefix(body).ok()?;
    if rest.is_empty() {
        Some(value)
    } else {
        None
    }
}

impl<'a> Processor<'a> {
    /// Dispatch one command packet by opcode, returning what happened so
    /// the main loop / tests can assert on it. Increments `cmd_ok`/`cmd_err`
    /// per spec.md §4.3's closing rule (RESET_COUNTERS never bumps `cmd_ok`).
    pub fn dispatch(&self, opcode: Opcode, body: &[u8]) -> Outcome {
        let outcome = self.dispatch_inner(opcode, body);
        match outcome {
            Outcome::HandledOk | Outcome::Enqueued => self.counters.incr_cmd_ok(),
            Outcome::Rejected => self.counters.incr_cmd_err(),
            Outcome::HandledNoCount => {}
        }
        outcome
    }

    fn dispatch_inner(&self, opcode: Opcode, body: &[u8]) -> Outcome {
        match opcode {
            Opcode::Noop => self.noop(body),
            Opcode::ResetCounters => self.reset_counters(body),
            Opcode::Copy => self.copy_or_move(opcode, body, false),
            Opcode::Move => self.copy_or_move(opcode, body, true),
            Opcode::Rename => self.rename(body),
            Opcode::Delete => self.delete(body),
            Opcode::DeleteAll => self.delete_all(body),
            #[cfg(feature = "decompress")]
            Opcode::Decompress => self.decompress(body),
            Opcode::Concat => self.concat(body),
            Opcode::GetFileInfo => self.get_file_info(body),
            Opcode::GetOpenFiles => self.get_open_files(body),
            Opcode::CreateDir => self.create_dir(body),
            Opcode::DeleteDir => self.delete_dir(body),
            Opcode::GetDirFile => self.get_dir_file(body),
            Opcode::GetDirPkt => self.get_dir_pkt(body),
            Opcode::GetFreeSpace => self.get_free_space(body),
            Opcode::SetTableState => self.set_table_state(body),
            Opcode::SetFilePerm => self.set_file_perm(body),
        }
    }

    fn enqueue(&self, opcode: Opcode, item: WorkItem) -> Outcome {
        if !v::verify_child_task_available(opcode, self.queue, self.queue_depth) {
            return Outcome::Rejected;
        }
        match self.queue.try_enqueue(item) {
            Ok(()) => {
                emit(Severity::Debug, base_eid(opcode), "enqueued");
                Outcome::Enqueued
            }
            Err(_) => {
                emit(Severity::Error, base_eid(opcode), "child queue full");
                Outcome::Rejected
            }
        }
    }

    fn noop(&self, body: &[u8]) -> Outcome {
        if !v::verify_packet_length(Opcode::Noop, body.len(), size_of::<crate::packet::EmptyCmd>()) {
            return Outcome::Rejected;
        }
        emit(
            Severity::Information,
            base_eid(Opcode::Noop),
            concat!("FM version ", env!("CARGO_PKG_VERSION")),
        );
        Outcome::HandledOk
    }

    fn reset_counters(&self, body: &[u8]) -> Outcome {
        if !v::verify_packet_length(
            Opcode::ResetCounters,
            body.len(),
            size_of::<crate::packet::EmptyCmd>(),
        ) {
            return Outcome::Rejected;
        }
        self.counters.reset();
        emit(Severity::Information, base_eid(Opcode::ResetCounters), "counters reset");
        Outcome::HandledNoCount
    }

    fn copy_or_move(&self, opcode: Opcode, body: &[u8], is_move: bool) -> Outcome {
        let Some(cmd): Option<CopyMoveCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<CopyMoveCmd>());
        };
        if !v::verify_overwrite_flag(opcode, cmd.overwrite) {
            return Outcome::Rejected;
        }
        let source = FmPath::from_bytes(&cmd.source);
        let target = FmPath::from_bytes(&cmd.target);
        if !v::verify_file_exists(opcode, self.os, &source) {
            return Outcome::Rejected;
        }
        let target_ok = if cmd.overwrite == 1 {
            v::verify_file_not_open(opcode, self.os, &target)
        } else {
            v::verify_file_no_exist(opcode, self.os, &target)
        };
        if !target_ok {
            return Outcome::Rejected;
        }
        let item = if is_move {
            WorkItem::Move { source, target }
        } else {
            WorkItem::Copy { source, target }
        };
        self.enqueue(opcode, item)
    }

    fn rename(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::Rename;
        let Some(cmd): Option<RenameCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<RenameCmd>());
        };
        let source = FmPath::from_bytes(&cmd.source);
        let target = FmPath::from_bytes(&cmd.target);
        if !v::verify_file_exists(opcode, self.os, &source) {
            return Outcome::Rejected;
        }
        if !v::verify_file_no_exist(opcode, self.os, &target) {
            return Outcome::Rejected;
        }
        self.enqueue(opcode, WorkItem::Rename { source, target })
    }

    fn delete(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::Delete;
        let Some(cmd): Option<DeleteCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<DeleteCmd>());
        };
        let path = FmPath::from_bytes(&cmd.path);
        if !v::verify_file_closed(opcode, self.os, &path) {
            return Outcome::Rejected;
        }
        // The opcode carried in the work item is preserved as-is rather than
        // hard-coded (spec.md §9 Open Question); see DESIGN.md for why this
        // crate keeps a separate `internal` flag instead of forwarding a raw
        // byte the way the upstream implementation does.
        self.enqueue(opcode, WorkItem::Delete { path, internal: false })
    }

    fn delete_all(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::DeleteAll;
        let Some(cmd): Option<DeleteAllCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<DeleteAllCmd>());
        };
        let directory = FmPath::from_bytes(&cmd.directory);
        if !v::verify_dir_exists(opcode, self.os, &directory) {
            return Outcome::Rejected;
        }
        // Enqueue both the raw and separator-appended forms so the worker's
        // directory walk sees a consistent prefix either way (spec.md §4.3).
        let with_sep = directory.with_trailing_separator();
        let first = self.enqueue(opcode, WorkItem::DeleteAll { directory });
        if first != Outcome::Enqueued {
            return first;
        }
        self.enqueue(opcode, WorkItem::DeleteAll { directory: with_sep })
    }

    #[cfg(feature = "decompress")]
    fn decompress(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::Decompress;
        let Some(cmd): Option<DecompressCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<DecompressCmd>());
        };
        let source = FmPath::from_bytes(&cmd.source);
        let target = FmPath::from_bytes(&cmd.target);
        if !v::verify_file_closed(opcode, self.os, &source) {
            return Outcome::Rejected;
        }
        if !v::verify_file_no_exist(opcode, self.os, &target) {
            return Outcome::Rejected;
        }
        self.enqueue(opcode, WorkItem::Decompress { source, target })
    }

    fn concat(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::Concat;
        let Some(cmd): Option<ConcatCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<ConcatCmd>());
        };
        let source1 = FmPath::from_bytes(&cmd.source1);
        let source2 = FmPath::from_bytes(&cmd.source2);
        let target = FmPath::from_bytes(&cmd.target);
        if !v::verify_file_closed(opcode, self.os, &source1) {
            return Outcome::Rejected;
        }
        if !v::verify_file_closed(opcode, self.os, &source2) {
            return Outcome::Rejected;
        }
        if !v::verify_file_no_exist(opcode, self.os, &target) {
            return Outcome::Rejected;
        }
        self.enqueue(
            opcode,
            WorkItem::Concat {
                source1,
                source2,
                target,
            },
        )
    }

    fn get_file_info(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::GetFileInfo;
        let Some(cmd): Option<GetFileInfoCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<GetFileInfoCmd>());
        };
        let path = FmPath::from_bytes(&cmd.path);
        let (state, meta) = v::verify_name_valid(opcode, self.os, &path);
        if state == crate::validators::NameState::Invalid {
            return Outcome::Rejected;
        }
        self.enqueue(
            opcode,
            WorkItem::GetFileInfo {
                path,
                cached_size: meta.size,
                cached_mtime: meta.mtime,
                cached_mode: meta.mode,
                crc_kind: cmd.crc_kind,
            },
        )
    }

    fn get_open_files(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::GetOpenFiles;
        if !v::verify_packet_length(
            opcode,
            body.len(),
            size_of::<GetOpenFilesCmd>(),
        ) {
            return Outcome::Rejected;
        }
        let tlm = telemetry::build_open_files_telemetry(self.os, usize::MAX);
        self.bus.publish_telemetry(&tlm.to_wire());
        Outcome::HandledOk
    }

    fn create_dir(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::CreateDir;
        let Some(cmd): Option<DirCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<DirCmd>());
        };
        let directory = FmPath::from_bytes(&cmd.directory);
        if !v::verify_dir_no_exist(opcode, self.os, &directory) {
            return Outcome::Rejected;
        }
        self.enqueue(opcode, WorkItem::CreateDir { directory })
    }

    fn delete_dir(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::DeleteDir;
        let Some(cmd): Option<DirCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<DirCmd>());
        };
        let directory = FmPath::from_bytes(&cmd.directory);
        if !v::verify_dir_exists(opcode, self.os, &directory) {
            return Outcome::Rejected;
        }
        self.enqueue(opcode, WorkItem::DeleteDir { directory })
    }

    fn get_dir_file(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::GetDirFile;
        let Some(cmd): Option<GetDirFileCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<GetDirFileCmd>());
        };
        let directory = FmPath::from_bytes(&cmd.directory);
        if !v::verify_dir_exists(opcode, self.os, &directory) {
            return Outcome::Rejected;
        }
        let mut target = FmPath::from_bytes(&cmd.target);
        if target.is_empty() {
            target = FmPath::from_str("/ram/fm_dir_list.out");
        }
        if !v::verify_file_not_open(opcode, self.os, &target) {
            return Outcome::Rejected;
        }
        self.enqueue(
            opcode,
            WorkItem::GetDirFile {
                directory,
                target,
                mode: SizeTimeMode::from_wire(cmd.get_size_time_mode),
            },
        )
    }

    fn get_dir_pkt(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::GetDirPkt;
        let Some(cmd): Option<GetDirPktCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<GetDirPktCmd>());
        };
        let directory = FmPath::from_bytes(&cmd.directory);
        if !v::verify_dir_exists(opcode, self.os, &directory) {
            return Outcome::Rejected;
        }
        self.enqueue(
            opcode,
            WorkItem::GetDirPkt {
                directory,
                offset: cmd.dir_list_offset,
                mode: SizeTimeMode::from_wire(cmd.get_size_time_mode),
            },
        )
    }

    fn get_free_space(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::GetFreeSpace;
        if !v::verify_packet_length(opcode, body.len(), size_of::<GetFreeSpaceCmd>()) {
            return Outcome::Rejected;
        }
        let table = self.table.lock();
        let Some(entries) = table.acquire() else {
            emit(Severity::Error, base_eid(opcode), "table not loaded");
            return Outcome::Rejected;
        };
        let tlm = telemetry::build_free_space_telemetry(self.os, entries);
        drop(table);
        self.bus.publish_telemetry(&tlm.to_wire());
        Outcome::HandledOk
    }

    fn set_table_state(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::SetTableState;
        let Some(cmd): Option<SetTableStateCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<SetTableStateCmd>());
        };
        let Some(new_state) = SlotState::from_wire(cmd.new_state) else {
            emit(Severity::Error, base_eid(opcode), "invalid requested state");
            return Outcome::Rejected;
        };
        let mut table = self.table.lock();
        match table::set_table_state(&mut table, cmd.table_entry_index as usize, new_state) {
            Ok(()) => {
                emit(
                    Severity::Information,
                    base_eid(opcode),
                    &format!("slot {} state changed", cmd.table_entry_index),
                );
                Outcome::HandledOk
            }
            Err(err) => {
                emit(Severity::Error, base_eid(opcode), &format!("{err:?}"));
                Outcome::Rejected
            }
        }
    }

    fn set_file_perm(&self, body: &[u8]) -> Outcome {
        let opcode = Opcode::SetFilePerm;
        let Some(cmd): Option<SetFilePermCmd> = decode(body) else {
            return self.reject_length(opcode, body.len(), size_of::<SetFilePermCmd>());
        };
        let path = FmPath::from_bytes(&cmd.path);
        let (state, _) = v::verify_name_valid(opcode, self.os, &path);
        if state == crate::validators::NameState::Invalid {
            return Outcome::Rejected;
        }
        self.enqueue(
            opcode,
            WorkItem::SetFilePerm {
                path,
                mode: cmd.mode,
            },
        )
    }

    fn reject_length(&self, opcode: Opcode, observed: usize, expected: usize) -> Outcome {
        v::verify_packet_length(opcode, observed, expected);
        Outcome::Rejected
    }
}

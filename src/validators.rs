//! Pure predicates over `(path, live filesystem)` (spec.md §4.2).
//!
//! Each validator emits its own descriptive event on failure and returns a
//! typed outcome rather than a bare `bool` -- closer to idiomatic Rust than
//! the upstream C, and explicitly sanctioned by Design Notes. A handler
//! evaluates validators in a fixed order and stops at the first failure;
//! only one event is emitted per rejected command.

use crate::events::{emit, Severity};
use crate::opcode::Opcode;
use crate::osshim::{EntryKind, Metadata, OsShim};
use crate::path::FmPath;
use crate::queue::HandshakeQueue;

/// Outcome of `verify_name_valid`: a three-valued classification plus the
/// metadata cached for a downstream `GET_FILE_INFO` handler so it can
/// forward size/mtime/mode without re-statting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameState {
    /// Not a well-formed, null-terminated, length-bounded path.
    Invalid,
    /// Resolves to a regular file.
    File,
    /// Resolves to a directory.
    Directory,
    /// Well-formed, but nothing exists there.
    NotInUse,
}

/// Check the declared packet length against the wire struct size for this
/// opcode. A hard reject on any mismatch (spec.md §4.2).
pub fn verify_packet_length(opcode: Opcode, observed: usize, expected: usize) -> bool {
    if observed != expected {
        emit(
            Severity::Error,
            crate::events::base_eid(opcode),
            &format!("packet length {observed} != expected {expected}"),
        );
        return false;
    }
    true
}

/// `overwrite` must be 0 or 1.
pub fn verify_overwrite_flag(opcode: Opcode, overwrite: u8) -> bool {
    if overwrite > 1 {
        emit(
            Severity::Error,
            crate::events::base_eid(opcode) + 1,
            &format!("overwrite flag {overwrite} is not 0 or 1"),
        );
        return false;
    }
    true
}

/// Path stats as a regular file (not directory, not missing).
pub fn verify_file_exists(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> bool {
    match os.stat(path).0 {
        EntryKind::File => true,
        _ => {
            emit(
                Severity::Error,
                crate::events::base_eid(opcode) + 2,
                &format!("{path} does not exist as a file"),
            );
            false
        }
    }
}

/// File exists and is not currently held open by any task.
pub fn verify_file_closed(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> bool {
    if !verify_file_exists(opcode, os, path) {
        return false;
    }
    if os.is_open(path) {
        emit(
            Severity::Error,
            crate::events::base_eid(opcode) + 3,
            &format!("{path} is currently open"),
        );
        return false;
    }
    true
}

/// Path does not stat to anything -- free for target creation.
pub fn verify_file_no_exist(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> bool {
    match os.stat(path).0 {
        EntryKind::Missing => true,
        _ => {
            emit(
                Severity::Error,
                crate::events::base_eid(opcode) + 4,
                &format!("{path} already exists"),
            );
            false
        }
    }
}

/// Exists (regardless of kind) or does not exist, but if it exists it must
/// not be open -- permits safe overwrite.
pub fn verify_file_not_open(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> bool {
    match os.stat(path).0 {
        EntryKind::Missing => true,
        _ => {
            if os.is_open(path) {
                emit(
                    Severity::Error,
                    crate::events::base_eid(opcode) + 5,
                    &format!("{path} is currently open"),
                );
                false
            } else {
                true
            }
        }
    }
}

/// Path stats as a directory.
pub fn verify_dir_exists(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> bool {
    match os.stat(path).0 {
        EntryKind::Directory => true,
        _ => {
            emit(
                Severity::Error,
                crate::events::base_eid(opcode) + 6,
                &format!("{path} does not exist as a directory"),
            );
            false
        }
    }
}

/// Path does not stat to anything.
pub fn verify_dir_no_exist(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> bool {
    match os.stat(path).0 {
        EntryKind::Missing => true,
        _ => {
            emit(
                Severity::Error,
                crate::events::base_eid(opcode) + 7,
                &format!("{path} already exists"),
            );
            false
        }
    }
}

/// A well-formed, null-terminated, length-bounded path. On `File`/
/// `Directory` outcomes, also returns the metadata to cache for
/// `GET_FILE_INFO` (spec.md §4.2).
pub fn verify_name_valid(opcode: Opcode, os: &dyn OsShim, path: &FmPath) -> (NameState, Metadata) {
    if path.is_empty() || !path.is_null_terminated() {
        emit(
            Severity::Error,
            crate::events::base_eid(opcode) + 8,
            &format!("{path} is not a valid name"),
        );
        return (NameState::Invalid, Metadata::default());
    }
    match os.stat(path) {
        (EntryKind::File, meta) => (NameState::File, meta),
        (EntryKind::Directory, meta) => (NameState::Directory, meta),
        (EntryKind::Missing, _) => (NameState::NotInUse, Metadata::default()),
    }
}

/// The handshake queue has room for one more item.
pub fn verify_child_task_available(opcode: Opcode, queue: &HandshakeQueue, depth: usize) -> bool {
    if queue.len() >= depth {
        emit(
            Severity::Error,
            crate::events::base_eid(opcode) + 9,
            "child queue full",
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osshim::mock::MockOsShim;

    #[test]
    fn name_valid_caches_metadata_for_file() {
        let os = MockOsShim::new();
        os.put_file("/ram/a.txt", b"ABCDEFGH");
        let (state, meta) = verify_name_valid(Opcode::GetFileInfo, &os, &FmPath::from_str("/ram/a.txt"));
        assert_eq!(state, NameState::File);
        assert_eq!(meta.size, 8);
    }

    #[test]
    fn name_valid_rejects_empty_path() {
        let os = MockOsShim::new();
        let (state, _) = verify_name_valid(Opcode::GetFileInfo, &os, &FmPath::empty());
        assert_eq!(state, NameState::Invalid);
    }

    #[test]
    fn queue_full_rejects() {
        let queue = HandshakeQueue::new(1);
        queue
            .try_enqueue(crate::workitem::WorkItem::Delete {
                path: FmPath::from_str("/ram/a"),
                internal: false,
            })
            .unwrap();
        assert!(!verify_child_task_available(Opcode::Delete, &queue, 1));
    }
}

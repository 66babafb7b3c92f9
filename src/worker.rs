//! The child worker: dequeues [`WorkItem`]s and executes them.
//!
//! Structured the same way the teacher crate's multi-threaded worker pool
//! (`src/session_mt.rs`) runs each `Worker`'s `while let Some(task) = ...`
//! loop against a shared queue, just with one worker and FM's own executors
//! instead of filesystem-op dispatch.

use std::io::{self, Read, Seek, Write};

use crc32fast::Hasher as Crc32;

use crate::bus::MessageBus;
use crate::cc::CcTracker;
use crate::config::{DIR_LIST_FILE_ENTRIES_PER_WAKE, DIR_LIST_PKT_ENTRIES};
use crate::counters::Counters;
use crate::error::FmError;
use crate::events::{base_eid, emit, Severity};
use crate::opcode::Opcode;
use crate::osshim::OsShim;
use crate::packet::DirListFileHeader;
use crate::path::FmPath;
use crate::queue::HandshakeQueue;
use crate::telemetry;
use crate::workitem::{SizeTimeMode, WorkItem};

/// Bytes moved per read/write in the streamed copy/concat/decompress
/// executors -- bounded so one huge file can't balloon worker memory use
/// (spec.md §4.5 "bounded-buffer streaming").
const STREAM_BUFFER_BYTES: usize = 512;

/// The child worker loop. Owns no state of its own beyond what's borrowed
/// here; `cc` and `counters` are shared with housekeeping telemetry.
pub struct Worker<'a> {
    pub os: &'a dyn OsShim,
    pub queue: &'a HandshakeQueue,
    pub counters: &'a Counters,
    pub bus: &'a dyn MessageBus,
    pub cc: &'a CcTracker,
}

impl<'a> Worker<'a> {
    /// Dequeue and execute work items until the queue is shut down
    /// (spec.md §4.5 step 1: blocks, then loops until told to exit).
    pub fn run(&self) {
        while let Some(item) = self.queue.dequeue_blocking() {
            let opcode = item.opcode();
            self.cc.start(opcode);
            match self.execute(item) {
                Ok(()) => {
                    self.counters.incr_child_ok();
                    emit(Severity::Debug, base_eid(opcode) + 50, "work item completed");
                }
                Err(FmError::WorkerWarn { reason, .. }) => {
                    self.counters.incr_child_warn();
                    emit(Severity::Warning, base_eid(opcode) + 51, &reason);
                }
                Err(err) => {
                    self.counters.incr_child_err();
                    emit(Severity::Error, base_eid(opcode) + 52, &format!("{err}"));
                }
            }
        }
    }

    fn execute(&self, item: WorkItem) -> Result<(), FmError> {
        match item {
            WorkItem::Copy { source, target } => self.stream_file(Opcode::Copy, &source, &target),
            WorkItem::Move { source, target } => self.move_or_rename(Opcode::Move, &source, &target),
            WorkItem::Rename { source, target } => {
                self.move_or_rename(Opcode::Rename, &source, &target)
            }
            WorkItem::Delete { path, internal } => self.delete(path, internal),
            WorkItem::DeleteAll { directory } => self.delete_all(&directory),
            #[cfg(feature = "decompress")]
            WorkItem::Decompress { source, target } => self.decompress(&source, &target),
            WorkItem::Concat {
                source1,
                source2,
                target,
            } => self.concat(&source1, &source2, &target),
            WorkItem::GetFileInfo {
                path,
                cached_size,
                cached_mtime,
                cached_mode,
                crc_kind,
            } => self.get_file_info(path, cached_size, cached_mtime, cached_mode, crc_kind),
            WorkItem::CreateDir { directory } => self.os.create_dir(&directory).map_err(|e| {
                FmError::WorkerFatal {
                    opcode: Opcode::CreateDir,
                    source: e,
                }
            }),
            WorkItem::DeleteDir { directory } => self.os.remove_dir(&directory).map_err(|e| {
                FmError::WorkerFatal {
                    opcode: Opcode::DeleteDir,
                    source: e,
                }
            }),
            WorkItem::GetDirFile {
                directory,
                target,
                mode,
            } => self.get_dir_file(&directory, &target, mode),
            WorkItem::GetDirPkt {
                directory,
                offset,
                mode,
            } => self.get_dir_pkt(&directory, offset, mode),
            WorkItem::SetFilePerm { path, mode } => {
                self.os
                    .set_permissions(&path, mode)
                    .map_err(|e| FmError::WorkerFatal {
                        opcode: Opcode::SetFilePerm,
                        source: e,
                    })
            }
        }
    }

    fn move_or_rename(&self, opcode: Opcode, from: &FmPath, to: &FmPath) -> Result<(), FmError> {
        self.os
            .rename(from, to)
            .map_err(|e| FmError::WorkerFatal { opcode, source: e })
    }

    fn delete(&self, path: FmPath, _internal: bool) -> Result<(), FmError> {
        // `_internal` distinguishes the public DELETE opcode from the
        // internal delete path at dispatch time (see
        // crate::opcode::INTERNAL_DELETE_FUNCTION_CODE and DESIGN.md); the
        // executor itself is identical either way, so there's nothing left
        // to branch on here.
        self.os.remove_file(&path).map_err(|e| FmError::WorkerFatal {
            opcode: Opcode::Delete,
            source: e,
        })
    }

    fn delete_all(&self, directory: &FmPath) -> Result<(), FmError> {
        let names = self
            .os
            .read_dir_names(directory)
            .map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::DeleteAll,
                source: e,
            })?;
        let mut first_warning = None;
        for name in names {
            let mut child = std::path::PathBuf::from(directory);
            child.push(&name);
            let child_path = FmPath::from(child.as_path());
            if let Err(e) = self.os.remove_file(&child_path) {
                first_warning.get_or_insert(format!("{name}: {e}"));
            }
        }
        match first_warning {
            None => Ok(()),
            Some(reason) => Err(FmError::WorkerWarn {
                opcode: Opcode::DeleteAll,
                reason,
            }),
        }
    }

    #[cfg(feature = "decompress")]
    fn decompress(&self, source: &FmPath, target: &FmPath) -> Result<(), FmError> {
        self.os
            .decompress(source, target)
            .map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::Decompress,
                source: e,
            })
    }

    fn concat(&self, source1: &FmPath, source2: &FmPath, target: &FmPath) -> Result<(), FmError> {
        let mut writer = self
            .os
            .create_writer(target)
            .map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::Concat,
                source: e,
            })?;
        for source in [source1, source2] {
            let mut reader = self
                .os
                .open_reader(source)
                .map_err(|e| FmError::WorkerFatal {
                    opcode: Opcode::Concat,
                    source: e,
                })?;
            copy_bounded(reader.as_mut(), writer.as_mut()).map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::Concat,
                source: e,
            })?;
        }
        Ok(())
    }

    fn stream_file(&self, opcode: Opcode, source: &FmPath, target: &FmPath) -> Result<(), FmError> {
        let mut reader = self
            .os
            .open_reader(source)
            .map_err(|e| FmError::WorkerFatal { opcode, source: e })?;
        let mut writer = self
            .os
            .create_writer(target)
            .map_err(|e| FmError::WorkerFatal { opcode, source: e })?;
        copy_bounded(reader.as_mut(), writer.as_mut())
            .map_err(|e| FmError::WorkerFatal { opcode, source: e })
    }

    fn get_file_info(
        &self,
        path: FmPath,
        cached_size: u64,
        cached_mtime: u64,
        cached_mode: u32,
        crc_kind: u32,
    ) -> Result<(), FmError> {
        let crc = if crc_kind == 0 {
            None
        } else {
            let mut reader = self
                .os
                .open_reader(&path)
                .map_err(|e| FmError::WorkerFatal {
                    opcode: Opcode::GetFileInfo,
                    source: e,
                })?;
            Some(crc32_of(reader.as_mut()).map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::GetFileInfo,
                source: e,
            })?)
        };
        emit(
            Severity::Information,
            base_eid(Opcode::GetFileInfo),
            &format!(
                "{path}: size={cached_size} mtime={cached_mtime} mode={cached_mode:o} crc={crc:?}"
            ),
        );
        Ok(())
    }

    fn get_dir_file(
        &self,
        directory: &FmPath,
        target: &FmPath,
        mode: SizeTimeMode,
    ) -> Result<(), FmError> {
        let names = self
            .os
            .read_dir_names(directory)
            .map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::GetDirFile,
                source: e,
            })?;
        let total_entries = names.len() as u32;
        let mut writer = self
            .os
            .create_patchable_writer(target)
            .map_err(|e| FmError::WorkerFatal {
                opcode: Opcode::GetDirFile,
                source: e,
            })?;
        let map_err = |e: io::Error| FmError::WorkerFatal {
            opcode: Opcode::GetDirFile,
            source: e,
        };
        // Reserve the header's space with a placeholder, stream rows as
        // they're produced, then seek back and patch in the true counts
        // (spec.md §6 "Directory list to file") -- the header carries
        // `written_entries`, which isn't known until the stream ends.
        let placeholder = DirListFileHeader {
            dir_name: directory.as_raw(),
            total_entries: 0,
            written_entries: 0,
        };
        writer
            .write_all(zerocopy::IntoBytes::as_bytes(&placeholder))
            .map_err(map_err)?;
        let mut written_entries: u32 = 0;
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 && i % DIR_LIST_FILE_ENTRIES_PER_WAKE == 0 {
                emit(
                    Severity::Debug,
                    base_eid(Opcode::GetDirFile) + 60,
                    &format!("directory listing wake point at entry {i}"),
                );
                std::thread::yield_now();
            }
            let (size, mtime) = match mode {
                SizeTimeMode::NameOnly => (0, 0),
                SizeTimeMode::QueryFs => {
                    let meta = self.os.stat_entry(directory, &name).unwrap_or_default();
                    (meta.size, meta.mtime)
                }
            };
            let row = crate::packet::DirListRow {
                name: FmPath::from_str(&name).as_raw(),
                size,
                mtime,
            };
            writer
                .write_all(zerocopy::IntoBytes::as_bytes(&row))
                .map_err(map_err)?;
            written_entries += 1;
        }
        let header = DirListFileHeader {
            dir_name: directory.as_raw(),
            total_entries,
            written_entries,
        };
        writer
            .seek(io::SeekFrom::Start(0))
            .and_then(|_| writer.write_all(zerocopy::IntoBytes::as_bytes(&header)))
            .map_err(map_err)
    }

    fn get_dir_pkt(
        &self,
        directory: &FmPath,
        offset: u32,
        mode: SizeTimeMode,
    ) -> Result<(), FmError> {
        let tlm = telemetry::build_dir_list_telemetry(
            self.os,
            directory,
            offset,
            mode,
            DIR_LIST_PKT_ENTRIES,
        )
        .map_err(|e| FmError::WorkerFatal {
            opcode: Opcode::GetDirPkt,
            source: e,
        })?;
        self.bus.publish_telemetry(&tlm.to_wire());
        Ok(())
    }
}

fn copy_bounded(reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<()> {
    let mut buf = [0u8; STREAM_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n])?;
    }
}

fn crc32_of(reader: &mut dyn Read) -> io::Result<u32> {
    let mut hasher = Crc32::new();
    let mut buf = [0u8; STREAM_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(hasher.finalize());
        }
        hasher.update(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::osshim::mock::MockOsShim;
    use zerocopy::FromBytes;

    fn worker<'a>(
        os: &'a MockOsShim,
        queue: &'a HandshakeQueue,
        counters: &'a Counters,
        bus: &'a MockBus,
        cc: &'a CcTracker,
    ) -> Worker<'a> {
        Worker {
            os,
            queue,
            counters,
            bus,
            cc,
        }
    }

    #[test]
    fn copy_streams_full_content() {
        let os = MockOsShim::new();
        os.put_file("/ram/a.txt", &vec![7u8; 2000]);
        let queue = HandshakeQueue::new(4);
        let counters = Counters::default();
        let bus = MockBus::new();
        let cc = CcTracker::new();
        let w = worker(&os, &queue, &counters, &bus, &cc);
        queue
            .try_enqueue(WorkItem::Copy {
                source: FmPath::from_str("/ram/a.txt"),
                target: FmPath::from_str("/ram/b.txt"),
            })
            .unwrap();
        queue.shutdown();
        w.run();
        assert_eq!(counters.snapshot().child_ok, 1);
        assert_eq!(os.read_file("/ram/b.txt").unwrap().len(), 2000);
    }

    #[test]
    fn delete_all_reports_warning_but_continues_on_one_bad_entry() {
        let os = MockOsShim::new();
        os.put_dir("/ram/d");
        os.put_file("/ram/d/ok.txt", b"x");
        // "bad.txt" is listed in the directory walk but not actually a file
        // in the mock's node table, simulating a race between the listing
        // and the delete.
        os.put_dir("/ram/d/bad.txt");
        let queue = HandshakeQueue::new(4);
        let counters = Counters::default();
        let bus = MockBus::new();
        let cc = CcTracker::new();
        let w = worker(&os, &queue, &counters, &bus, &cc);
        queue
            .try_enqueue(WorkItem::DeleteAll {
                directory: FmPath::from_str("/ram/d"),
            })
            .unwrap();
        queue.shutdown();
        w.run();
        assert_eq!(counters.snapshot().child_warn, 1);
        assert!(os.read_file("/ram/d/ok.txt").is_none());
    }

    #[test]
    fn get_dir_pkt_publishes_telemetry() {
        let os = MockOsShim::new();
        os.put_dir("/ram/d");
        os.put_file("/ram/d/a.txt", b"x");
        os.put_file("/ram/d/b.txt", b"y");
        let queue = HandshakeQueue::new(4);
        let counters = Counters::default();
        let bus = MockBus::new();
        let cc = CcTracker::new();
        let w = worker(&os, &queue, &counters, &bus, &cc);
        queue
            .try_enqueue(WorkItem::GetDirPkt {
                directory: FmPath::from_str("/ram/d"),
                offset: 0,
                mode: SizeTimeMode::NameOnly,
            })
            .unwrap();
        queue.shutdown();
        w.run();
        assert_eq!(counters.snapshot().child_ok, 1);
        assert_eq!(bus.telemetry.lock().unwrap().len(), 1);
    }

    #[test]
    fn get_dir_file_back_patches_the_header_with_final_counts() {
        let os = MockOsShim::new();
        os.put_dir("/ram/d");
        os.put_file("/ram/d/a.txt", b"x");
        os.put_file("/ram/d/b.txt", b"y");
        os.put_file("/ram/d/c.txt", b"z");
        let queue = HandshakeQueue::new(4);
        let counters = Counters::default();
        let bus = MockBus::new();
        let cc = CcTracker::new();
        let w = worker(&os, &queue, &counters, &bus, &cc);
        queue
            .try_enqueue(WorkItem::GetDirFile {
                directory: FmPath::from_str("/ram/d"),
                target: FmPath::from_str("/ram/listing.dat"),
                mode: SizeTimeMode::NameOnly,
            })
            .unwrap();
        queue.shutdown();
        w.run();
        assert_eq!(counters.snapshot().child_ok, 1);
        let bytes = os.read_file("/ram/listing.dat").unwrap();
        let (header, rows) =
            DirListFileHeader::read_from_prefix(bytes.as_slice()).unwrap();
        assert_eq!(header.total_entries, 3);
        assert_eq!(header.written_entries, 3);
        assert_eq!(rows.len(), 3 * std::mem::size_of::<crate::packet::DirListRow>());
    }
}

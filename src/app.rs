//! The service entry point: wires processor, worker, bus and table manager
//! together into the main loop (spec.md §4.1).
//!
//! Grounded on the teacher crate's `session_mt.rs`, which spawns one worker
//! thread per configured slot and runs the session's own loop on the caller's
//! thread; here there is exactly one worker thread, started by [`App::run`]
//! and joined on exit.

use std::time::Duration;

use parking_lot::Mutex;

use crate::bus::MessageBus;
use crate::cc::CcTracker;
use crate::config::FmConfig;
use crate::counters::Counters;
use crate::events::{emit, Severity, EID_BUS_ERROR, EID_EXIT, EID_INIT_FAILURE, EID_UNKNOWN_OPCODE};
use crate::opcode::{MessageId, Opcode};
use crate::osshim::OsShim;
use crate::processor::Processor;
use crate::queue::HandshakeQueue;
use crate::table::{TableEntry, TableManager, TABLE_ENTRY_COUNT};
use crate::worker::Worker;

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Still running.
    Running,
    /// Stopped cleanly (the bus reported a terminal condition).
    Stopped,
}

/// The assembled service. Holds every piece of shared state the processor
/// and worker borrow from; the bus and OS shim stay external collaborators,
/// passed in at `run` time (spec.md §1).
pub struct App {
    config: FmConfig,
    counters: Counters,
    queue: HandshakeQueue,
    table: Mutex<TableManager>,
    cc: CcTracker,
}

impl App {
    /// Build an unstarted service from validated configuration.
    pub fn new(config: FmConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(App {
            queue: HandshakeQueue::new(config.child_queue_depth),
            config,
            counters: Counters::default(),
            table: Mutex::new(TableManager::new()),
            cc: CcTracker::new(),
        })
    }

    /// Best-effort initial table load (spec.md §4.6 "init"): failure is
    /// logged but never prevents startup, since table-dependent commands
    /// reject on their own once dispatched against an absent table.
    pub fn load_initial_table(&self, entries: [TableEntry; TABLE_ENTRY_COUNT]) {
        let report = self.table.lock().load(entries);
        if !report.is_ok() {
            emit(
                Severity::Error,
                EID_INIT_FAILURE,
                &format!("initial table image failed validation: {report:?}"),
            );
        }
    }

    /// Run the main loop against `bus`/`os` until a terminal condition is
    /// reached. Spawns the child worker on a dedicated thread for the
    /// duration of the call (spec.md §5's two-thread model).
    pub fn run(&self, bus: &dyn MessageBus, os: &dyn OsShim) {
        std::thread::scope(|scope| {
            let worker = Worker {
                os,
                queue: &self.queue,
                counters: &self.counters,
                bus,
                cc: &self.cc,
            };
            scope.spawn(move || worker.run());

            let mut status = RunStatus::Running;
            while status == RunStatus::Running {
                status = self.tick(bus, os);
            }

            self.queue.shutdown();
        });

        // spec.md §4.1: the final exit event goes out over the event bus,
        // with the `log` sink (via `emit`) as the fallback that survives even
        // if the bus itself is what just failed.
        const EXIT_MESSAGE: &str = "FM application exiting";
        bus.publish_event(EXIT_MESSAGE);
        emit(Severity::Information, EID_EXIT, EXIT_MESSAGE);
    }

    fn tick(&self, bus: &dyn MessageBus, os: &dyn OsShim) -> RunStatus {
        match bus.receive(self.config.sb_timeout) {
            Ok(Some(received)) => {
                self.dispatch_received(received, bus, os);
                RunStatus::Running
            }
            Ok(None) => {
                // Idle tick: release and re-acquire the table so the
                // table-management layer gets a chance to apply a deferred
                // load/dump even when housekeeping runs slower than 1 Hz
                // (spec.md §4.1).
                let mut table = self.table.lock();
                let current = table.acquire().copied();
                if let Some(entries) = current {
                    table.release();
                    table.load(entries);
                }
                RunStatus::Running
            }
            Err(e) => {
                emit(Severity::Error, EID_BUS_ERROR, &format!("bus receive failed: {e}"));
                RunStatus::Stopped
            }
        }
    }

    fn dispatch_received(&self, received: crate::bus::Received, bus: &dyn MessageBus, os: &dyn OsShim) {
        match received.message_id {
            MessageId::SendHk => self.publish_housekeeping(bus, os),
            MessageId::Cmd => self.dispatch_cmd(&received.bytes, bus, os),
        }
    }

    fn dispatch_cmd(&self, bytes: &[u8], bus: &dyn MessageBus, os: &dyn OsShim) {
        let Some(&raw_opcode) = bytes.first() else {
            emit(Severity::Error, EID_UNKNOWN_OPCODE, "empty command packet");
            self.counters.incr_cmd_err();
            return;
        };
        let Ok(opcode) = Opcode::try_from(raw_opcode) else {
            emit(
                Severity::Error,
                EID_UNKNOWN_OPCODE,
                &format!("unrecognized opcode {raw_opcode}"),
            );
            self.counters.incr_cmd_err();
            return;
        };
        let processor = Processor {
            os,
            queue: &self.queue,
            counters: &self.counters,
            table: &self.table,
            bus,
            queue_depth: self.config.child_queue_depth,
        };
        // The opcode byte itself is framing, stripped here before handing
        // the opcode-specific body to the processor.
        processor.dispatch(opcode, &bytes[1..]);
    }

    fn publish_housekeeping(&self, bus: &dyn MessageBus, os: &dyn OsShim) {
        let table = self.table.lock();
        let num_open_files = crate::telemetry::build_open_files_telemetry(os, usize::MAX).num_open_files;
        let (load_count, validate_count) = (table.load_count(), table.validate_count());
        drop(table);
        let tlm = crate::telemetry::HkTelemetry {
            counters: self.counters.snapshot(),
            queue_count: self.queue.len() as u32,
            current_cc: self.cc.current(),
            previous_cc: self.cc.previous(),
            num_open_files,
            table_load_count: load_count,
            table_validate_count: validate_count,
        };
        bus.publish_telemetry(&tlm.to_wire());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::osshim::mock::MockOsShim;
    use crate::packet::{CopyMoveCmd, PacketHeader};
    use crate::path::FmPath;

    fn copy_packet(source: &str, target: &str) -> Vec<u8> {
        let cmd = CopyMoveCmd {
            header: PacketHeader {
                seconds: 0,
                subseconds: 0,
                _reserved: 0,
            },
            source: FmPath::from_str(source).as_raw(),
            target: FmPath::from_str(target).as_raw(),
            overwrite: 0,
            _pad: [0; 3],
        };
        zerocopy::IntoBytes::as_bytes(&cmd).to_vec()
    }

    #[test]
    fn stops_cleanly_on_bus_error() {
        let app = App::new(FmConfig::default().sb_timeout(Duration::from_millis(1))).unwrap();
        let os = MockOsShim::new();
        let bus = MockBus::new();
        let status = app.tick(&bus, &os);
        assert_eq!(status, RunStatus::Running);
    }

    #[test]
    fn dispatches_a_copy_end_to_end() {
        let app = App::new(FmConfig::default()).unwrap();
        let os = MockOsShim::new();
        let bus = MockBus::new();
        os.put_file("/ram/a.txt", b"hello");
        // Opcode byte is the first byte of the packet; real framing (not
        // modeled here) stamps it ahead of the header.
        let mut bytes = vec![Opcode::Copy as u8];
        bytes.extend_from_slice(&copy_packet("/ram/a.txt", "/ram/b.txt"));
        bus.push(MessageId::Cmd, bytes);
        app.tick(&bus, &os);
        assert_eq!(app.counters.snapshot().cmd_ok, 1);
    }
}

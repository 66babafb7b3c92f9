//! Onboard File Manager (FM) for a spacecraft flight-software bus.
//!
//! FM accepts command packets from a ground link, performs file-system
//! operations (copy, move, rename, delete, concat, decompress, permission
//! changes, directory create/delete/listing), and publishes telemetry
//! (housekeeping counters, open-file lists, directory listings, per-volume
//! free-space reports). The design is a two-tier pipeline: a high-priority
//! command processor validates every packet against the live file-system
//! state and either rejects it synchronously or hands a validated work item
//! to a low-priority child worker, which performs the blocking I/O.
//!
//! The message bus, event/log service, performance counters and
//! application-lifecycle harness are external collaborators, specified only
//! at their trait boundary ([`bus::MessageBus`]). Likewise the OS primitives
//! (open/stat/rename/remove/read-dir/stat-volume/chmod/decompress) sit
//! behind [`osshim::OsShim`], which is the seam tests substitute a mock
//! filesystem through.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod app;
pub mod bus;
pub mod cc;
pub mod config;
pub mod counters;
pub mod error;
pub mod events;
pub mod opcode;
pub mod osshim;
pub mod packet;
pub mod path;
pub mod processor;
pub mod queue;
pub mod table;
pub mod telemetry;
pub mod validators;
pub mod worker;
pub mod workitem;

pub use crate::app::{App, RunStatus};
pub use crate::bus::{MessageBus, Received};
pub use crate::config::FmConfig;
pub use crate::error::FmError;
pub use crate::opcode::{MessageId, Opcode};
pub use crate::osshim::OsShim;
pub use crate::path::FmPath;

//! Error types shared across the command processor, worker and table manager.

use thiserror::Error;

use crate::opcode::Opcode;

/// Errors that can be produced while validating or executing a command.
///
/// These never cross back to the command originator directly (see the
/// worker/processor concurrency split) -- they exist so that each layer can
/// log a precise event and bump the right counter.
#[derive(Debug, Error)]
pub enum FmError {
    /// A validator rejected the command before any side effect occurred.
    #[error("validation failed for {opcode:?}: {reason}")]
    Validation {
        /// Opcode under validation.
        opcode: Opcode,
        /// Human-readable reason, also used as the event string.
        reason: String,
    },

    /// A table-dependent command was issued while the volume table is unloaded.
    #[error("volume table not loaded")]
    TableUnloaded,

    /// The handshake queue has no free slots.
    #[error("child queue full")]
    QueueFull,

    /// The worker could not complete a work item at all.
    #[error("worker fatal error on {opcode:?}: {source}")]
    WorkerFatal {
        /// Opcode being executed.
        opcode: Opcode,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The worker hit a recoverable fault partway through a work item
    /// (e.g. one bad entry in a `DELETE_ALL`) and continued.
    #[error("worker warning on {opcode:?}: {reason}")]
    WorkerWarn {
        /// Opcode being executed.
        opcode: Opcode,
        /// Human-readable reason.
        reason: String,
    },

    /// The message bus reported a receive error; this is terminal for the
    /// main loop.
    #[error("bus error: {0}")]
    Bus(String),

    /// A startup/initialization step failed.
    #[error("init error: {0}")]
    Init(String),
}

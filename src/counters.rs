//! Telemetry counters.
//!
//! Three independent pairs (spec.md §3): processor `cmd_ok`/`cmd_err`,
//! worker `child_ok`/`child_err`/`child_warn`, and the queue depth gauge
//! (owned by [`crate::queue::HandshakeQueue`], not here). All six counters
//! saturate at `u32::MAX` rather than wrapping.
//!
//! Processor fields are written only by the main thread; worker fields only
//! by the worker thread (spec.md §5), so plain `AtomicU32` with `Relaxed`
//! ordering is enough -- there is exactly one writer per field and readers
//! (housekeeping) tolerate a one-cycle skew across the whole snapshot.

use std::sync::atomic::{AtomicU32, Ordering};

/// The six saturating counters plus their snapshot accessor.
#[derive(Debug, Default)]
pub struct Counters {
    cmd_ok: AtomicU32,
    cmd_err: AtomicU32,
    child_ok: AtomicU32,
    child_err: AtomicU32,
    child_warn: AtomicU32,
}

fn saturating_incr(counter: &AtomicU32) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_add(1))
    });
}

impl Counters {
    /// Increment `cmd_ok`. Never called for `RESET_COUNTERS` (spec.md §3).
    pub fn incr_cmd_ok(&self) {
        saturating_incr(&self.cmd_ok);
    }

    /// Increment `cmd_err`.
    pub fn incr_cmd_err(&self) {
        saturating_incr(&self.cmd_err);
    }

    /// Increment `child_ok`.
    pub fn incr_child_ok(&self) {
        saturating_incr(&self.child_ok);
    }

    /// Increment `child_err`.
    pub fn incr_child_err(&self) {
        saturating_incr(&self.child_err);
    }

    /// Increment `child_warn`.
    pub fn incr_child_warn(&self) {
        saturating_incr(&self.child_warn);
    }

    /// Zero all six counters. Used by `RESET_COUNTERS`; the queue gauge is
    /// untouched (it lives on the queue, not here).
    pub fn reset(&self) {
        self.cmd_ok.store(0, Ordering::Relaxed);
        self.cmd_err.store(0, Ordering::Relaxed);
        self.child_ok.store(0, Ordering::Relaxed);
        self.child_err.store(0, Ordering::Relaxed);
        self.child_warn.store(0, Ordering::Relaxed);
    }

    /// A point-in-time snapshot of all five counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            cmd_ok: self.cmd_ok.load(Ordering::Relaxed),
            cmd_err: self.cmd_err.load(Ordering::Relaxed),
            child_ok: self.child_ok.load(Ordering::Relaxed),
            child_err: self.child_err.load(Ordering::Relaxed),
            child_warn: self.child_warn.load(Ordering::Relaxed),
        }
    }
}

/// A non-atomic snapshot of the five command/worker counters, suitable for
/// embedding directly into a housekeeping telemetry packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_instead_of_wrapping() {
        let counters = Counters::default();
        for _ in 0..3 {
            counters.incr_cmd_ok();
        }
        assert_eq!(counters.snapshot().cmd_ok, 3);
    }

    #[test]
    fn reset_zeroes_all_six_but_is_not_counted_as_ok() {
        let counters = Counters::default();
        counters.incr_cmd_ok();
        counters.incr_cmd_err();
        counters.incr_child_ok();
        counters.reset();
        let snap = counters.snapshot();
        assert_eq!(snap, CounterSnapshot::default());
    }
}

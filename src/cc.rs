//! Last-attempted / last-completed command-code tracking.
//!
//! The worker is the sole writer, housekeeping telemetry the sole reader
//! (spec.md §3's "Last CC" / "Previous CC" fields), so a pair of `AtomicU8`
//! is enough -- the same single-writer reasoning [`crate::counters::Counters`]
//! relies on.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::opcode::Opcode;

const NONE: u8 = u8::MAX;

/// Shared current/previous opcode state.
#[derive(Debug)]
pub struct CcTracker {
    current: AtomicU8,
    previous: AtomicU8,
}

impl Default for CcTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CcTracker {
    /// No opcode has run yet.
    pub fn new() -> Self {
        CcTracker {
            current: AtomicU8::new(NONE),
            previous: AtomicU8::new(NONE),
        }
    }

    /// Record that `opcode` is starting: the prior `current` becomes
    /// `previous` (spec.md §4.5 "set current_cc before dispatch").
    pub fn start(&self, opcode: Opcode) {
        let prior = self.current.swap(opcode as u8, Ordering::Relaxed);
        self.previous.store(prior, Ordering::Relaxed);
    }

    /// The opcode currently (or most recently) executing.
    pub fn current(&self) -> Option<Opcode> {
        decode(self.current.load(Ordering::Relaxed))
    }

    /// The opcode completed just before `current`.
    pub fn previous(&self) -> Option<Opcode> {
        decode(self.previous.load(Ordering::Relaxed))
    }
}

fn decode(v: u8) -> Option<Opcode> {
    if v == NONE {
        None
    } else {
        Opcode::try_from(v).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let cc = CcTracker::new();
        assert_eq!(cc.current(), None);
        assert_eq!(cc.previous(), None);
    }

    #[test]
    fn previous_follows_current() {
        let cc = CcTracker::new();
        cc.start(Opcode::Copy);
        assert_eq!(cc.current(), Some(Opcode::Copy));
        assert_eq!(cc.previous(), None);
        cc.start(Opcode::Move);
        assert_eq!(cc.current(), Some(Opcode::Move));
        assert_eq!(cc.previous(), Some(Opcode::Copy));
    }
}

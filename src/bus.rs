//! Message-bus abstraction.
//!
//! A trait over receive/publish primitives, standing in for the spacecraft
//! message bus (spec.md §1's "underlying message bus... out of scope,
//! specified only at its interface"). Grounded on the teacher crate's
//! `ChannelSender` (`src/channel.rs`), which plays the same role for the
//! FUSE kernel channel: a narrow trait the rest of the crate depends on,
//! with a real and a test implementation.

use std::time::Duration;

use crate::opcode::MessageId;

/// A received buffer plus which message ID it arrived on.
#[derive(Debug, Clone)]
pub struct Received {
    /// Which of the two subscribed message IDs this buffer was published to.
    pub message_id: MessageId,
    /// Raw packet bytes (header + opcode-specific body).
    pub bytes: Vec<u8>,
}

/// Trait over the command/telemetry bus. The main loop only ever calls
/// `receive`; command handlers and housekeeping call `publish_telemetry`;
/// every layer can call `publish_event`.
pub trait MessageBus: Send + Sync {
    /// Block up to `timeout` for the next buffer on a subscribed message ID.
    /// `Ok(None)` means the wait timed out with nothing to report.
    fn receive(&self, timeout: Duration) -> std::io::Result<Option<Received>>;

    /// Publish a telemetry packet's raw bytes.
    fn publish_telemetry(&self, bytes: &[u8]);

    /// Publish an event string (already leveled and EID-tagged by the
    /// caller via `crate::events::emit`; this is the bus-side fan-out, kept
    /// separate so a real deployment can route events to its event service
    /// in addition to the local `log` sink).
    fn publish_event(&self, message: &str);
}

/// An in-memory bus double, used the same way `osshim::mock` is: by unit
/// tests in this crate and by the end-to-end scenarios under `tests/`.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// An in-memory bus double: a FIFO of buffers to hand back from
    /// `receive`, plus a record of everything published.
    #[derive(Default)]
    pub struct MockBus {
        inbox: Mutex<VecDeque<Received>>,
        pub telemetry: Mutex<Vec<Vec<u8>>>,
        pub events: Mutex<Vec<String>>,
    }

    impl MockBus {
        /// A bus with nothing queued.
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a buffer to be returned by the next `receive` call.
        pub fn push(&self, message_id: MessageId, bytes: Vec<u8>) {
            self.inbox.lock().unwrap().push_back(Received { message_id, bytes });
        }
    }

    impl MessageBus for MockBus {
        fn receive(&self, _timeout: Duration) -> std::io::Result<Option<Received>> {
            Ok(self.inbox.lock().unwrap().pop_front())
        }

        fn publish_telemetry(&self, bytes: &[u8]) {
            self.telemetry.lock().unwrap().push(bytes.to_vec());
        }

        fn publish_event(&self, message: &str) {
            self.events.lock().unwrap().push(message.to_string());
        }
    }
}

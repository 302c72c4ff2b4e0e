//! The single logical push connection.
//!
//! [`ConnectionManager`] drives the transport: handshake, authentication,
//! heartbeat, disconnect detection and reconnection with exponential
//! backoff. Other components only need to know whether the session is
//! ready and how to send a message, which is what [`MessageSink`] exposes.

mod backoff;
mod manager;
mod state;

pub use backoff::Backoff;
pub use manager::{CLIENT_DISCONNECT_REASON, ConnectionManager};
pub use state::{ConnectionSnapshot, ConnectionState};

use crate::error::SyncResult;
use crate::protocol::ClientMessage;

/// Outbound side of the connection as seen by the other components.
pub trait MessageSink: Send + Sync {
    /// True once the session is usable
    fn is_ready(&self) -> bool;

    /// Queue a message on the live link
    fn send(&self, message: ClientMessage) -> SyncResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::MessageSink;
    use crate::error::{SyncError, SyncResult};
    use crate::protocol::ClientMessage;

    /// Sink that records messages instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        ready: AtomicBool,
        fail_sends: AtomicBool,
        sent: Mutex<Vec<ClientMessage>>,
    }

    impl RecordingSink {
        pub(crate) fn ready() -> Self {
            let sink = Self::default();
            sink.set_ready(true);
            sink
        }

        pub(crate) fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::SeqCst);
        }

        pub(crate) fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<ClientMessage> {
            self.sent.lock().clone()
        }

        pub(crate) fn sent_names(&self) -> Vec<String> {
            self.sent.lock().iter().map(|m| m.event_name()).collect()
        }

        pub(crate) fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    impl MessageSink for RecordingSink {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn send(&self, message: ClientMessage) -> SyncResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) || !self.is_ready() {
                return Err(SyncError::not_connected("recording sink offline"));
            }
            self.sent.lock().push(message);
            Ok(())
        }
    }
}

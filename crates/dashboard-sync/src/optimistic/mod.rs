//! Optimistic local writes.
//!
//! A write is shown immediately, sent to the server tagged with a
//! [`RequestId`], and later either committed by a confirmation or rolled
//! back to the last committed value on rejection or timeout.

mod id;
mod pending;
mod protocol;

pub use id::{ParseError, RequestId};
pub use pending::PendingOptimisticUpdate;
pub use protocol::OptimisticUpdateProtocol;

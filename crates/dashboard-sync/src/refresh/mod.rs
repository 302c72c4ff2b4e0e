//! Refresh coordination.
//!
//! [`RefreshCoordinator`] serves cached values first and always asks the
//! server for a recomputation, collapsing offline intents into one request
//! per data type. [`RefreshRule`]s map forwarded domain events such as
//! `timer.started` to throttled refreshes.

mod coordinator;
mod pattern;
mod rules;

pub use coordinator::{RefreshCoordinator, RefreshDispatch, RefreshOutcome};
pub use pattern::event_matches;
pub use rules::RefreshRule;

//! Subscription bookkeeping.
//!
//! Views declare what they want with a [`SubscriptionDescriptor`]; the
//! [`SubscriptionRegistry`] keeps the set, sends it when the session is ready
//! and replays it after every reconnect.

mod descriptor;
mod registry;

pub use descriptor::SubscriptionDescriptor;
pub use registry::SubscriptionRegistry;

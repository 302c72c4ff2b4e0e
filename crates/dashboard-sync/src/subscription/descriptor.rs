//! What a view wants to receive

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::event::DataType;
use crate::protocol::ClientMessage;

/// A server-side subscription: a kind (e.g. `dashboard`), the role it is
/// scoped to and optionally the data types of interest.
///
/// Descriptors are plain values; two descriptors with the same fields are the
/// same subscription.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDescriptor {
    /// Subscription kind; prefixes the `.subscribe` event name
    pub kind: String,
    /// Role the subscription is scoped to
    pub role: String,
    /// Data types of interest; `None` means every type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_types: Option<BTreeSet<DataType>>,
}

impl SubscriptionDescriptor {
    /// Subscribe to every data type of `kind`
    pub fn new(kind: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: role.into(),
            data_types: None,
        }
    }

    /// The `dashboard` subscription for `role`
    pub fn dashboard(role: impl Into<String>) -> Self {
        Self::new("dashboard", role)
    }

    /// Narrow the subscription to the given data types
    #[must_use]
    pub fn with_data_types(mut self, types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = Some(types.into_iter().collect());
        self
    }

    /// Whether updates for `data_type` fall under this subscription
    pub fn covers(&self, data_type: DataType) -> bool {
        self.data_types
            .as_ref()
            .is_none_or(|types| types.contains(&data_type))
    }

    /// The `<kind>.subscribe` message for this descriptor
    pub fn subscribe_message(&self) -> ClientMessage {
        ClientMessage::Subscribe {
            kind: self.kind.clone(),
            role: self.role.clone(),
            data_types: self
                .data_types
                .as_ref()
                .map(|types| types.iter().copied().collect()),
        }
    }

    /// The `<kind>.unsubscribe` message for this descriptor
    pub fn unsubscribe_message(&self) -> ClientMessage {
        ClientMessage::Unsubscribe {
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Display for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.role)?;
        if let Some(types) = &self.data_types {
            let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
            write!(f, "[{}]", names.join(","))?;
        }
        Ok(())
    }
}

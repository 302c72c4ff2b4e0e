//! Correlation ids for optimistic updates

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error parsing a [`RequestId`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request ID must start with 'req_' prefix
    #[error("Request ID must start with 'req_' prefix")]
    MissingPrefix,

    /// Invalid UUID format
    #[error("Invalid UUID format: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

/// A unique, time-ordered correlation id based on UUID v7.
///
/// Displayed with a `req_` prefix in logs; sent on the wire as the bare UUID
/// so the server can echo it back unchanged. Deserialization accepts both
/// forms.
///
/// # Example
/// ```rust,ignore
/// let id = RequestId::new();
/// println!("{}", id); // req_01234567-89ab-7cde-8f01-234567890abc
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new request ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse a request ID, requiring the `req_` prefix.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if let Some(uuid_str) = s.strip_prefix("req_") {
            Uuid::parse_str(uuid_str)
                .map(Self)
                .map_err(ParseError::InvalidUuid)
        } else {
            Err(ParseError::MissingPrefix)
        }
    }

    /// Parse a request ID with or without the `req_` prefix.
    pub fn parse_lenient(s: &str) -> Result<Self, ParseError> {
        let uuid_str = s.strip_prefix("req_").unwrap_or(s);
        Uuid::parse_str(uuid_str)
            .map(Self)
            .map_err(ParseError::InvalidUuid)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse_lenient(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_request_id_display_has_prefix() {
        let id = RequestId::new();
        let s = id.to_string();
        assert!(s.starts_with("req_"));
        assert_eq!(s.len(), 40);
    }

    #[test]
    fn test_request_id_parse_requires_prefix() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(
            RequestId::parse(&id.as_uuid().to_string()),
            Err(ParseError::MissingPrefix)
        );
    }

    #[test]
    fn test_request_id_parse_lenient() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse_lenient(&id.to_string()).unwrap(), id);
        assert_eq!(
            RequestId::parse_lenient(&id.as_uuid().to_string()).unwrap(),
            id
        );
        assert!(RequestId::parse_lenient("req_not-a-uuid").is_err());
    }

    #[test]
    fn test_request_id_serializes_bare_uuid() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let ids: HashSet<_> = (0..500).map(|_| RequestId::new()).collect();
        assert_eq!(ids.len(), 500);
    }
}

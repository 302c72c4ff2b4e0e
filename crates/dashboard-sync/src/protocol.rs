//! Wire codec for the push connection.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<dotted name>", "data": <payload>}`. Outbound messages are
//! modelled by [`ClientMessage`], inbound ones are decoded into
//! [`ServerMessage`]; event names the client does not interpret are kept as
//! [`ServerMessage::Domain`] and forwarded unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::error::ProtocolError;
use crate::event::DataType;
use crate::optimistic::RequestId;

/// Raw `{event, data}` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Dotted event name
    pub event: String,
    /// Event payload; absent payloads decode as `null`
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame from a name and payload
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a raw text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize to a text frame
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode {
            event: self.event.clone(),
            reason: e.to_string(),
        })
    }
}

/// Credentials presented in the `authenticate` handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Authenticated user id
    pub user_id: String,
    /// Session token; never logged
    pub token: String,
    /// Dashboard role, e.g. `admin` or `manager`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Identity {
    /// Create an identity without a role
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
            role: None,
        }
    }

    /// Attach a role
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .field("role", &self.role)
            .finish()
    }
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `authenticate {identity}`
    Authenticate(Identity),
    /// `<kind>.subscribe {role, dataTypes?}`
    Subscribe {
        /// Subscription kind, e.g. `dashboard`
        kind: String,
        /// Role the subscription is scoped to
        role: String,
        /// Data types of interest; `None` means all
        data_types: Option<Vec<DataType>>,
    },
    /// `<kind>.unsubscribe {}`
    Unsubscribe {
        /// Subscription kind
        kind: String,
    },
    /// `dashboard.request_refresh {type}`
    RequestRefresh {
        /// Data type to recompute
        data_type: DataType,
    },
    /// `dashboard.optimistic_update {type, data, requestId}`
    OptimisticUpdate {
        /// Data type being written
        data_type: DataType,
        /// Speculative value
        data: Value,
        /// Correlation id echoed back in the confirmation
        request_id: RequestId,
    },
    /// `ping {timestamp}`
    Ping {
        /// Send time
        timestamp: DateTime<Utc>,
    },
}

impl ClientMessage {
    /// Event name this message is sent under
    pub fn event_name(&self) -> String {
        match self {
            Self::Authenticate(_) => "authenticate".to_string(),
            Self::Subscribe { kind, .. } => format!("{}.subscribe", kind),
            Self::Unsubscribe { kind } => format!("{}.unsubscribe", kind),
            Self::RequestRefresh { .. } => "dashboard.request_refresh".to_string(),
            Self::OptimisticUpdate { .. } => "dashboard.optimistic_update".to_string(),
            Self::Ping { .. } => "ping".to_string(),
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            Self::Authenticate(identity) => serde_json::to_value(identity)?,
            Self::Subscribe {
                role, data_types, ..
            } => match data_types {
                Some(types) => json!({ "role": role, "dataTypes": types }),
                None => json!({ "role": role }),
            },
            Self::Unsubscribe { .. } => json!({}),
            Self::RequestRefresh { data_type } => json!({ "type": data_type }),
            Self::OptimisticUpdate {
                data_type,
                data,
                request_id,
            } => json!({ "type": data_type, "data": data, "requestId": request_id }),
            Self::Ping { timestamp } => json!({ "timestamp": timestamp }),
        })
    }

    /// Encode into a text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let event = self.event_name();
        let data = self.payload().map_err(|e| ProtocolError::Encode {
            event: event.clone(),
            reason: e.to_string(),
        })?;
        Frame::new(event, data).to_text()
    }
}

#[derive(Deserialize)]
struct AuthenticatedPayload {
    status: String,
}

#[derive(Deserialize)]
struct DataUpdatedPayload {
    #[serde(rename = "type")]
    data_type: DataType,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConfirmedPayload {
    request_id: RequestId,
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PongPayload {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `authenticated {status}`
    Authenticated {
        /// Raw status string
        status: String,
    },
    /// `dashboard.data_updated {type, data, timestamp}`
    DataUpdated {
        /// Data type of the payload
        data_type: DataType,
        /// Opaque payload
        data: Value,
        /// Server computation time
        timestamp: Option<DateTime<Utc>>,
    },
    /// `dashboard.update_confirmed {requestId, success, data?, error?}`
    UpdateConfirmed {
        /// Correlation id
        request_id: RequestId,
        /// Whether the update was accepted
        success: bool,
        /// Server-confirmed value
        data: Option<Value>,
        /// Failure message
        error: Option<String>,
    },
    /// `pong {timestamp}`
    Pong {
        /// Server time, if sent
        timestamp: Option<DateTime<Utc>>,
    },
    /// Any other event, forwarded unchanged
    Domain {
        /// Dotted event name
        name: String,
        /// Opaque payload
        payload: Value,
    },
}

fn payload<T: for<'de> Deserialize<'de>>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

impl ServerMessage {
    /// Decode a raw text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::from_frame(Frame::parse(text)?)
    }

    /// Interpret an already parsed frame
    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let Frame { event, data } = frame;
        match event.as_str() {
            "authenticated" => {
                let p: AuthenticatedPayload = payload(&event, data)?;
                Ok(Self::Authenticated { status: p.status })
            }
            "dashboard.data_updated" => {
                let p: DataUpdatedPayload = payload(&event, data)?;
                Ok(Self::DataUpdated {
                    data_type: p.data_type,
                    data: p.data,
                    timestamp: p.timestamp,
                })
            }
            "dashboard.update_confirmed" => {
                let p: UpdateConfirmedPayload = payload(&event, data)?;
                Ok(Self::UpdateConfirmed {
                    request_id: p.request_id,
                    success: p.success,
                    data: p.data,
                    error: p.error,
                })
            }
            "pong" => {
                let p: PongPayload = payload(&event, data)?;
                Ok(Self::Pong {
                    timestamp: p.timestamp,
                })
            }
            _ => Ok(Self::Domain {
                name: event,
                payload: data,
            }),
        }
    }
}

/// True for `authenticated` statuses that mean the handshake succeeded.
pub fn is_auth_success(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "success" | "authenticated" | "ok"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(text: &str) -> Frame {
        Frame::parse(text).unwrap()
    }

    #[test]
    fn test_subscribe_encoding() {
        let msg = ClientMessage::Subscribe {
            kind: "dashboard".into(),
            role: "admin".into(),
            data_types: Some(vec![DataType::Metrics, DataType::ActiveTimers]),
        };
        let frame = frame_of(&msg.encode().unwrap());
        assert_eq!(frame.event, "dashboard.subscribe");
        assert_eq!(
            frame.data,
            json!({"role": "admin", "dataTypes": ["metrics", "active_timers"]})
        );

        let msg = ClientMessage::Subscribe {
            kind: "dashboard".into(),
            role: "admin".into(),
            data_types: None,
        };
        assert_eq!(frame_of(&msg.encode().unwrap()).data, json!({"role": "admin"}));
    }

    #[test]
    fn test_unsubscribe_and_refresh_encoding() {
        let frame = frame_of(
            &ClientMessage::Unsubscribe {
                kind: "dashboard".into(),
            }
            .encode()
            .unwrap(),
        );
        assert_eq!(frame.event, "dashboard.unsubscribe");
        assert_eq!(frame.data, json!({}));

        let frame = frame_of(
            &ClientMessage::RequestRefresh {
                data_type: DataType::TeamData,
            }
            .encode()
            .unwrap(),
        );
        assert_eq!(frame.event, "dashboard.request_refresh");
        assert_eq!(frame.data, json!({"type": "team_data"}));
    }

    #[test]
    fn test_optimistic_update_encoding_uses_bare_uuid() {
        let id = RequestId::new();
        let frame = frame_of(
            &ClientMessage::OptimisticUpdate {
                data_type: DataType::ActiveTimers,
                data: json!({"running": 1}),
                request_id: id,
            }
            .encode()
            .unwrap(),
        );
        assert_eq!(frame.event, "dashboard.optimistic_update");
        assert_eq!(frame.data["requestId"], json!(id.as_uuid().to_string()));
        assert_eq!(frame.data["type"], json!("active_timers"));
    }

    #[test]
    fn test_identity_debug_redacts_token() {
        let identity = Identity::new("u-1", "secret-token").with_role("admin");
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));

        let frame = frame_of(&ClientMessage::Authenticate(identity).encode().unwrap());
        assert_eq!(
            frame.data,
            json!({"userId": "u-1", "token": "secret-token", "role": "admin"})
        );
    }

    #[test]
    fn test_decode_data_updated() {
        let msg = ServerMessage::decode(
            r#"{"event":"dashboard.data_updated","data":{"type":"metrics","data":{"revenue":10},"timestamp":"2024-05-01T12:00:00Z"}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::DataUpdated {
                data_type,
                data,
                timestamp,
            } => {
                assert_eq!(data_type, DataType::Metrics);
                assert_eq!(data, json!({"revenue": 10}));
                assert!(timestamp.is_some());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_update_confirmed() {
        let id = RequestId::new();
        let text = json!({
            "event": "dashboard.update_confirmed",
            "data": {"requestId": id.as_uuid().to_string(), "success": false, "error": "locked"}
        })
        .to_string();
        assert_eq!(
            ServerMessage::decode(&text).unwrap(),
            ServerMessage::UpdateConfirmed {
                request_id: id,
                success: false,
                data: None,
                error: Some("locked".into()),
            }
        );
    }

    #[test]
    fn test_unknown_events_become_domain_events() {
        let msg =
            ServerMessage::decode(r#"{"event":"timer.started","data":{"id":7}}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Domain {
                name: "timer.started".into(),
                payload: json!({"id": 7}),
            }
        );

        let msg = ServerMessage::decode(r#"{"event":"client.updated"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Domain {
                name: "client.updated".into(),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            ServerMessage::decode("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"event":"dashboard.data_updated","data":{"type":"bogus"}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_auth_success_statuses() {
        assert!(is_auth_success("success"));
        assert!(is_auth_success("Authenticated"));
        assert!(is_auth_success("ok"));
        assert!(!is_auth_success("denied"));
        assert!(!is_auth_success(""));
    }
}

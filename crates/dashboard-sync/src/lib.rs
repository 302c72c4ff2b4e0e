#![warn(missing_docs)]
//! # Dashboard Sync
//!
//! Client-side real-time synchronization for operations dashboards.
//!
//! ## Overview
//!
//! The client keeps dashboard views current over a persistent duplex
//! connection:
//! - **Connection management** with transport fallback, authentication and
//!   exponential reconnect backoff
//! - **Typed events** delivered to isolated handlers
//! - **Subscriptions** that survive reconnects and are replayed once per session
//! - **TTL cache** with per-type lifetimes and LRU bounds
//! - **Refresh coordination** with offline collapsing, throttling and
//!   domain-event rules
//! - **Optimistic updates** with server confirmation and rollback
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SyncClient                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ Subscription │  │   Refresh    │  │    Optimistic      │  │
//! │  │   Registry   │  │ Coordinator  │  │  Update Protocol   │  │
//! │  └──────┬───────┘  └──────┬───────┘  └─────────┬──────────┘  │
//! │         │      MessageSink│                    │             │
//! │         ▼                 ▼                    ▼             │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │                 ConnectionManager                    │    │
//! │  │   Transport ─▶ authenticate ─▶ heartbeat ─▶ backoff  │    │
//! │  └──────────────────────────┬───────────────────────────┘    │
//! │                             │ ClientEvent                    │
//! │                             ▼                                │
//! │  ┌─────────────────┐   ┌──────────────────────────────┐      │
//! │  │ EventDispatcher │──▶│ CacheStore / consumer views  │      │
//! │  └─────────────────┘   └──────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dashboard_sync::prelude::*;
//! use std::sync::Arc;
//!
//! let transport = FallbackTransport::new()
//!     .then(Arc::new(WebSocketTransport::new("wss://ops.example.com/socket")));
//! let client = SyncClient::new(SyncConfig::default(), Arc::new(transport))?;
//!
//! client.subscribe_with(
//!     SubscriptionDescriptor::dashboard("admin"),
//!     handler(|event| {
//!         if let ClientEvent::DataUpdated { data_type, data, .. } = event {
//!             println!("{data_type}: {data}");
//!         }
//!         Ok(())
//!     }),
//! );
//! client.connect(Some(Identity::new("user-1", "token")))?;
//! ```
//!
//! ## Optimistic Updates
//!
//! ```rust,ignore
//! let id = client.apply_optimistic(DataType::ActiveTimers, json!({"running": 3}));
//! // The cache shows the speculative value immediately. A matching
//! // `update_confirmed` commits it; a rejection or timeout restores the
//! // previous entry and emits `OptimisticRejected`.
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! let config = SyncConfig::from_json(r#"{
//!     "reconnect": { "base_delay_ms": 500, "max_attempts": 5 },
//!     "cache": { "ttl_ms": { "metrics": 60000 } }
//! }"#)?;
//! ```
//!
//! ## Module Structure
//!
//! - [`SyncClient`] - Service wiring every component together
//! - [`connection`] - Connection lifecycle and backoff
//! - [`transport`] - Transport abstraction and implementations
//! - [`dispatcher`] - Event handler registry
//! - [`cache`] - TTL cache
//! - [`subscription`] - Subscription descriptors and registry
//! - [`refresh`] - Refresh coordination and domain-event rules
//! - [`optimistic`] - Optimistic update protocol
//! - [`protocol`] - Wire frames and messages
//! - [`SyncError`] - Error types and codes
//! - [`SyncConfig`] - Client configuration

pub mod cache;
mod client;
mod config;
pub mod connection;
pub mod dispatcher;
mod error;
pub mod event;
pub mod logging;
pub mod optimistic;
pub mod protocol;
pub mod refresh;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod tests;

// Public API
pub use cache::{CacheEntry, CacheStats, CacheStore};
pub use client::SyncClient;
pub use config::{
    CacheConfig, ConfigValidationError, DEFAULT_MAX_ENTRIES, DEFAULT_TTLS_MS, ReconnectConfig,
    RefreshConfig, SyncConfig,
};
pub use connection::{
    Backoff, CLIENT_DISCONNECT_REASON, ConnectionManager, ConnectionSnapshot, ConnectionState,
    MessageSink,
};
pub use dispatcher::{DispatchReport, EventDispatcher, Handler, Interceptor, handler};
pub use error::{
    HandlerError, ProtocolError, SyncError, SyncErrorCode, SyncResult, TransportError,
};
pub use event::{ClientEvent, DataSource, DataType, EventKind, RejectionReason};
pub use logging::{
    ConnectionLogEvent, OptimisticLogEvent, log_connection_event, log_optimistic_event,
};
pub use optimistic::{OptimisticUpdateProtocol, ParseError, PendingOptimisticUpdate, RequestId};
pub use protocol::{ClientMessage, Frame, Identity, ServerMessage, is_auth_success};
pub use refresh::{
    RefreshCoordinator, RefreshDispatch, RefreshOutcome, RefreshRule, event_matches,
};
pub use subscription::{SubscriptionDescriptor, SubscriptionRegistry};
pub use transport::{
    FallbackTransport, FrameSink, FrameStream, MemoryTransport, Transport, TransportLink,
    WebSocketTransport,
};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use dashboard_sync::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Events
        ClientEvent,
        // Configuration
        CacheConfig,
        ConnectionState,
        DataSource,
        DataType,
        EventKind,
        // Transports
        FallbackTransport,
        // Handlers
        Handler,
        Identity,
        MemoryTransport,
        ReconnectConfig,
        RefreshConfig,
        RefreshRule,
        RejectionReason,
        RequestId,
        SubscriptionDescriptor,
        // Client
        SyncClient,
        SyncConfig,
        // Errors
        SyncError,
        SyncErrorCode,
        SyncResult,
        Transport,
        WebSocketTransport,
        handler,
    };
}

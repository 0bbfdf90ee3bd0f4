//! # murmur-core
//!
//! The realtime hub of murmur: who is online, whether they are still alive,
//! and how each inbound frame turns into stored state and pushes.
//!
//! - **Registry** - identity to live connection, one per identity
//! - **Heartbeat** - one ping/pong supervisor task per connection
//! - **Router** - one handler per inbound frame type
//! - **Delivery** - push now, or leave unread for the backlog
//! - **Backlog** - missed content pushed on connect
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│ Event Store │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Heartbeat  │     │  Delivery   │────▶ Registry ────▶ peer Connection
//! └─────────────┘     └─────────────┘
//! ```

pub mod backlog;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod registry;
pub mod router;

pub use backlog::{BacklogReport, MissedContentLoader};
pub use config::HubConfig;
pub use connection::Connection;
pub use delivery::{Delivery, DeliveryEngine, LogNotifier, OfflineNotifier};
pub use error::{HubError, Result};
pub use heartbeat::HeartbeatConfig;
pub use hub::Hub;
pub use registry::Registry;
pub use router::EventRouter;

//! Real-time push connections.
//!
//! This module provides:
//! - Per-topic connection state with bounded linear retry, and an
//!   unbounded fixed-interval retry for the global topic
//! - Demultiplexing of inbound frames into typed notifications
//! - Fan-out of notifications and connection state through a [`Dispatcher`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      WsManager                       │
//! │   (event loop: commands, transport events, timers)   │
//! └──────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//!                ┌──────────────────┐
//!                │   Multiplexer    │  one Connection per Topic
//!                └──────────────────┘
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!   ┌────────────┐  ┌────────────┐  ┌────────────┐
//!   │ Transport  │  │ Transport  │  │ Transport  │
//!   │ (/ws/0)    │  │ (/ws/12)   │  │ (/ws/31)   │
//!   └────────────┘  └────────────┘  └────────────┘
//!                          │
//!                          ▼
//!            ┌──────────────────────────┐
//!            │ Dispatcher<RealtimeEvent>│
//!            └──────────────────────────┘
//!                          │
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!     LivePolls        LivePolls       status UI
//!    (listing)       (poll detail)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new();
//! let polls = LivePolls::attach(&dispatcher, Scope::All);
//! let ws = WsManager::connect(&ClientConfig::from_env(), dispatcher)?;
//! ws.subscribe_global();
//! ```
//!
//! [`Dispatcher`]: crate::dispatch::Dispatcher

mod connection;
mod manager;
mod multiplexer;

pub use connection::{
    Connection, ConnectionState, Connector, Endpoint, EventSink, LifecycleEvent, Outbound,
    PlatformConnector, ReconnectPolicy, ReconnectSettings, TransportError, TransportEvent,
    TransportHandle,
};
pub use manager::WsManager;
pub use multiplexer::{Multiplexer, RealtimeEvent, ScheduledReconnect, TopicStatus};

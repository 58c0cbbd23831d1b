//! QuickPoll client core.
//!
//! Keeps a local collection of polls in sync with the server's push channel:
//!
//! - [`identity`]: anonymous visitor id attached to every request
//! - [`ws`]: one WebSocket per topic, reconnect policy, frame decoding
//! - [`dispatch`]: typed broadcast from the connection layer to observers
//! - [`stores`]: ordered poll collections merged from notifications
//! - [`api_client`]: the REST endpoints the core relies on

#[macro_use]
pub mod logging;

pub mod api_client;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod runtime;
pub mod storage;
pub mod stores;
pub mod ws;

pub use api_client::ApiClient;
pub use config::{ClientConfig, ConfigError};
pub use dispatch::{Dispatcher, Subscription};
pub use identity::{Identity, IdentityEvent, IdentityResolver, Resolution};
pub use stores::{Change, LivePolls, PollCollection, Scope};
pub use ws::{ConnectionState, RealtimeEvent, WsManager};

//! Per-topic connection state, reconnect policy and the transport seam.
//!
//! This module provides the shared types and conditionally includes
//! the platform-specific transport.

use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use quickpoll_shared::Topic;
use thiserror::Error;
use url::Url;

/// Lifecycle of one topic's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// `Open` or `Connecting`: a subscribe for this topic is a no-op.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Connecting)
    }
}

/// When to retry a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Retry up to `max_attempts` times, waiting `attempt × base_delay`.
    Linear {
        max_attempts: u32,
        base_delay: Duration,
    },
    /// Retry forever at a fixed interval.
    Fixed { delay: Duration },
}

impl ReconnectPolicy {
    pub const TOPIC_MAX_ATTEMPTS: u32 = 5;
    pub const TOPIC_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const GLOBAL_DELAY: Duration = Duration::from_millis(3000);

    pub fn per_topic() -> Self {
        ReconnectPolicy::Linear {
            max_attempts: Self::TOPIC_MAX_ATTEMPTS,
            base_delay: Self::TOPIC_BASE_DELAY,
        }
    }

    pub fn global() -> Self {
        ReconnectPolicy::Fixed {
            delay: Self::GLOBAL_DELAY,
        }
    }

    /// Delay before the next attempt, given how many retries were already
    /// scheduled since the last successful open. `None` means give up.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Linear {
                max_attempts,
                base_delay,
            } => (attempts < max_attempts).then(|| base_delay * (attempts + 1)),
            ReconnectPolicy::Fixed { delay } => Some(delay),
        }
    }
}

/// Policies for per-poll topics and for the global topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSettings {
    pub topic: ReconnectPolicy,
    pub global: ReconnectPolicy,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            topic: ReconnectPolicy::per_topic(),
            global: ReconnectPolicy::global(),
        }
    }
}

impl ReconnectSettings {
    pub fn for_topic(&self, topic: Topic) -> ReconnectPolicy {
        if topic.is_global() {
            self.global
        } else {
            self.topic
        }
    }
}

/// Base of the push endpoint; topics live at `{base}/ws/{topicId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    pub fn parse(base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base)?,
        })
    }

    pub fn url_for(&self, topic: Topic) -> String {
        format!(
            "{}/ws/{}",
            self.base.as_str().trim_end_matches('/'),
            topic.wire_id()
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport for {0} is gone")]
    Gone(Topic),
}

/// Frame or control message headed to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Handle for sending frames through one transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    topic: Topic,
    sender: UnboundedSender<Outbound>,
}

impl TransportHandle {
    /// A handle plus the receiving end the transport task drains.
    pub fn channel(topic: Topic) -> (Self, UnboundedReceiver<Outbound>) {
        let (sender, receiver) = unbounded();
        (Self { topic, sender }, receiver)
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.sender
            .unbounded_send(Outbound::Text(text))
            .map_err(|_| TransportError::Gone(self.topic))
    }

    /// Ask the transport to close. Idempotent.
    pub fn close(&self) {
        let _ = self.sender.unbounded_send(Outbound::Close);
        self.sender.close_channel();
    }
}

/// What a transport reports back to the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { reason: Option<String> },
}

/// A transport event tagged with the connection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub topic: Topic,
    pub generation: u64,
    pub event: TransportEvent,
}

/// Reporting side given to a transport when it is opened.
#[derive(Debug, Clone)]
pub struct EventSink {
    topic: Topic,
    generation: u64,
    sender: UnboundedSender<LifecycleEvent>,
}

impl EventSink {
    pub fn new(topic: Topic, generation: u64, sender: UnboundedSender<LifecycleEvent>) -> Self {
        Self {
            topic,
            generation,
            sender,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn frame(&self, text: String) {
        self.emit(TransportEvent::Frame(text));
    }

    pub fn closed(&self, reason: Option<String>) {
        self.emit(TransportEvent::Closed { reason });
    }

    fn emit(&self, event: TransportEvent) {
        // The multiplexer may already be gone; nothing left to tell.
        let _ = self.sender.unbounded_send(LifecycleEvent {
            topic: self.topic,
            generation: self.generation,
            event,
        });
    }
}

/// Opens transports. Implementations must report every outcome, including
/// a failed connect, through the sink, and must stop when the handle closes.
pub trait Connector: Send + Sync {
    fn open(&self, url: &str, sink: EventSink) -> TransportHandle;
}

/// Bookkeeping for one topic.
#[derive(Debug)]
pub struct Connection {
    pub topic: Topic,
    pub state: ConnectionState,
    /// Reconnects scheduled since the last successful open.
    pub attempts: u32,
    /// Bumped for every transport opened for this topic.
    pub generation: u64,
    /// A reconnect timer for `generation` is outstanding.
    pub reconnect_pending: bool,
    pub transport: Option<TransportHandle>,
}

impl Connection {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            state: ConnectionState::Closed,
            attempts: 0,
            generation: 0,
            reconnect_pending: false,
            transport: None,
        }
    }

    /// Closed with no retry outstanding: only an explicit subscribe revives it.
    pub fn is_abandoned(&self) -> bool {
        self.state == ConnectionState::Closed && !self.reconnect_pending
    }
}

// Include platform-specific implementation
#[cfg(target_arch = "wasm32")]
mod connection_wasm;
#[cfg(target_arch = "wasm32")]
pub use connection_wasm::PlatformConnector;

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::PlatformConnector;

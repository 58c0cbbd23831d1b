//! Connection multiplexer: zero-or-one connection per topic.
//!
//! The multiplexer is a synchronous state machine. It never sleeps and never
//! spawns; it is driven by [`super::WsManager`], which feeds it commands,
//! transport lifecycle events and fired reconnect timers on one event loop.
//!
//! Each connection moves `Connecting → Open → Closed`. Every transition
//! publishes exactly one [`RealtimeEvent::ConnectionStateChanged`]. Transport
//! events and timers carry the generation of the transport they belong to;
//! anything stale is ignored, so a late close from a replaced transport can
//! never tear down its successor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::UnboundedSender;
use quickpoll_shared::{parse_frame, Notification, Topic};

use super::connection::{
    Connection, ConnectionState, Connector, Endpoint, EventSink, LifecycleEvent,
    ReconnectSettings, TransportEvent,
};
use crate::dispatch::Dispatcher;

/// Everything the real-time core tells its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Notification {
        topic: Topic,
        notification: Notification,
    },
    ConnectionStateChanged {
        topic: Topic,
        state: ConnectionState,
    },
}

/// A reconnect the driver must fire after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledReconnect {
    pub topic: Topic,
    pub generation: u64,
    pub delay: Duration,
}

/// Snapshot of one topic for consumers that poll connection presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicStatus {
    pub state: ConnectionState,
    pub attempts: u32,
    /// Retries are exhausted; the topic stays closed until subscribed again.
    pub abandoned: bool,
}

pub struct Multiplexer {
    endpoint: Endpoint,
    settings: ReconnectSettings,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher<RealtimeEvent>,
    lifecycle: UnboundedSender<LifecycleEvent>,
    connections: HashMap<Topic, Connection>,
    next_generation: u64,
}

impl Multiplexer {
    /// A multiplexer with no connections. Transports report back through
    /// `lifecycle`.
    pub fn new(
        endpoint: Endpoint,
        settings: ReconnectSettings,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher<RealtimeEvent>,
        lifecycle: UnboundedSender<LifecycleEvent>,
    ) -> Self {
        Self {
            endpoint,
            settings,
            connector,
            dispatcher,
            lifecycle,
            connections: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Ensure a connection for `topic` exists. Returns `true` if a transport
    /// was opened, `false` if one was already open or connecting.
    ///
    /// A closed topic (waiting for a retry, or abandoned) is reopened at once
    /// with a fresh attempt budget.
    pub fn subscribe(&mut self, topic: Topic) -> bool {
        let connection = self
            .connections
            .entry(topic)
            .or_insert_with(|| Connection::new(topic));

        if connection.state.is_live() {
            return false;
        }

        connection.attempts = 0;
        connection.reconnect_pending = false;
        self.open_transport(topic);
        true
    }

    /// Close the topic's transport and forget all bookkeeping for it.
    ///
    /// The global topic lives as long as the multiplexer and is only torn
    /// down by [`shutdown`](Self::shutdown).
    pub fn unsubscribe(&mut self, topic: Topic) -> bool {
        if topic.is_global() {
            crate::log_warn!("Ignoring unsubscribe from {}", topic);
            return false;
        }
        self.teardown(topic)
    }

    fn teardown(&mut self, topic: Topic) -> bool {
        let Some(connection) = self.connections.remove(&topic) else {
            return false;
        };

        if let Some(transport) = &connection.transport {
            transport.close();
        }
        if connection.state != ConnectionState::Closed {
            self.emit_state(topic, ConnectionState::Closed);
        }
        crate::log_debug!("Closed {}", topic);
        true
    }

    /// Send `message` if the topic is open; otherwise drop it.
    pub fn publish(&self, topic: Topic, message: String) -> bool {
        let Some(connection) = self.connections.get(&topic) else {
            return false;
        };
        match (&connection.state, &connection.transport) {
            (ConnectionState::Open, Some(transport)) => transport.send(message).is_ok(),
            _ => {
                crate::log_debug!("Dropping message for {}: not open", topic);
                false
            }
        }
    }

    /// Apply one transport event. Returns the reconnect to schedule, if any.
    pub fn handle(&mut self, event: LifecycleEvent) -> Option<ScheduledReconnect> {
        let LifecycleEvent {
            topic,
            generation,
            event,
        } = event;

        let current = self
            .connections
            .get(&topic)
            .is_some_and(|c| c.generation == generation);
        if !current {
            crate::log_debug!("Ignoring stale {:?} for {} (generation {})", event, topic, generation);
            return None;
        }

        match event {
            TransportEvent::Opened => {
                self.on_opened(topic);
                None
            }
            TransportEvent::Frame(text) => {
                self.on_frame(topic, &text);
                None
            }
            TransportEvent::Closed { reason } => self.on_closed(topic, reason),
        }
    }

    /// A reconnect timer fired. Acts only if the connection is still the one
    /// that scheduled it and is still closed.
    pub fn reconnect_due(&mut self, topic: Topic, generation: u64) -> bool {
        let Some(connection) = self.connections.get_mut(&topic) else {
            return false;
        };
        let due = connection.generation == generation
            && connection.state == ConnectionState::Closed
            && connection.reconnect_pending;
        if !due {
            return false;
        }

        connection.reconnect_pending = false;
        crate::log_info!("Reconnecting to {} (attempt {})", topic, connection.attempts);
        self.open_transport(topic);
        true
    }

    /// Close every transport and drop all bookkeeping.
    pub fn shutdown(&mut self) {
        let topics: Vec<Topic> = self.connections.keys().copied().collect();
        for topic in topics {
            self.teardown(topic);
        }
    }

    pub fn state(&self, topic: Topic) -> Option<ConnectionState> {
        self.connections.get(&topic).map(|c| c.state)
    }

    pub fn status(&self, topic: Topic) -> Option<TopicStatus> {
        self.connections.get(&topic).map(status_of)
    }

    pub fn statuses(&self) -> HashMap<Topic, TopicStatus> {
        self.connections
            .iter()
            .map(|(topic, connection)| (*topic, status_of(connection)))
            .collect()
    }

    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        self.connections.keys().copied()
    }

    fn open_transport(&mut self, topic: Topic) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let url = self.endpoint.url_for(topic);
        let sink = EventSink::new(topic, generation, self.lifecycle.clone());
        let transport = self.connector.open(&url, sink);

        if let Some(connection) = self.connections.get_mut(&topic) {
            if let Some(previous) = connection.transport.replace(transport) {
                previous.close();
            }
            connection.generation = generation;
            connection.state = ConnectionState::Connecting;
        }
        crate::log_debug!("Opening {} at {} (generation {})", topic, url, generation);
        self.emit_state(topic, ConnectionState::Connecting);
    }

    fn on_opened(&mut self, topic: Topic) {
        let Some(connection) = self.connections.get_mut(&topic) else {
            return;
        };
        if connection.state != ConnectionState::Connecting {
            return;
        }
        connection.state = ConnectionState::Open;
        connection.attempts = 0;
        crate::log_info!("Connected to {}", topic);
        self.emit_state(topic, ConnectionState::Open);
    }

    fn on_frame(&self, topic: Topic, text: &str) {
        if self.state(topic) != Some(ConnectionState::Open) {
            return;
        }
        match parse_frame(text) {
            Ok(Some(notification)) => {
                self.dispatcher.publish(&RealtimeEvent::Notification {
                    topic,
                    notification,
                });
            }
            Ok(None) => crate::log_debug!("Ignoring unrecognized frame on {}", topic),
            Err(e) => crate::log_warn!("Dropping malformed frame on {}: {}", topic, e),
        }
    }

    fn on_closed(&mut self, topic: Topic, reason: Option<String>) -> Option<ScheduledReconnect> {
        let policy = self.settings.for_topic(topic);
        let connection = self.connections.get_mut(&topic)?;
        if connection.state == ConnectionState::Closed {
            return None;
        }

        connection.state = ConnectionState::Closed;
        connection.transport = None;

        let scheduled = match policy.next_delay(connection.attempts) {
            Some(delay) => {
                connection.attempts += 1;
                connection.reconnect_pending = true;
                crate::log_info!(
                    "{} closed ({}); reconnecting in {}ms (attempt {})",
                    topic,
                    reason.as_deref().unwrap_or("no reason"),
                    delay.as_millis(),
                    connection.attempts
                );
                Some(ScheduledReconnect {
                    topic,
                    generation: connection.generation,
                    delay,
                })
            }
            None => {
                crate::log_warn!(
                    "{} closed; giving up after {} reconnect attempts",
                    topic,
                    connection.attempts
                );
                None
            }
        };

        self.emit_state(topic, ConnectionState::Closed);
        scheduled
    }

    fn emit_state(&self, topic: Topic, state: ConnectionState) {
        self.dispatcher
            .publish(&RealtimeEvent::ConnectionStateChanged { topic, state });
    }
}

fn status_of(connection: &Connection) -> TopicStatus {
    TopicStatus {
        state: connection.state,
        attempts: connection.attempts,
        abandoned: connection.is_abandoned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::{Outbound, TransportHandle};
    use futures_channel::mpsc::{unbounded, UnboundedReceiver};
    use parking_lot::Mutex;

    /// Records every open; transports are plain channels.
    #[derive(Default)]
    struct RecordingConnector {
        opened: Mutex<Vec<String>>,
        outbound: Mutex<Vec<UnboundedReceiver<Outbound>>>,
    }

    impl Connector for RecordingConnector {
        fn open(&self, url: &str, sink: EventSink) -> TransportHandle {
            self.opened.lock().push(url.to_string());
            let (handle, receiver) = TransportHandle::channel(sink.topic());
            self.outbound.lock().push(receiver);
            handle
        }
    }

    struct Harness {
        mux: Multiplexer,
        connector: Arc<RecordingConnector>,
        events: Arc<Mutex<Vec<RealtimeEvent>>>,
        _subscription: crate::dispatch::Subscription,
    }

    impl Harness {
        fn new() -> Self {
            let connector = Arc::new(RecordingConnector::default());
            let dispatcher = Dispatcher::new();
            let events = Arc::new(Mutex::new(Vec::new()));
            let subscription = {
                let events = events.clone();
                dispatcher.register(move |e: &RealtimeEvent| events.lock().push(e.clone()))
            };
            let (lifecycle, _) = unbounded();
            let mux = Multiplexer::new(
                Endpoint::parse("ws://localhost:8000").unwrap(),
                ReconnectSettings::default(),
                connector.clone(),
                dispatcher,
                lifecycle,
            );
            Self {
                mux,
                connector,
                events,
                _subscription: subscription,
            }
        }

        fn generation(&self, topic: Topic) -> u64 {
            self.mux.connections[&topic].generation
        }

        fn send(&mut self, topic: Topic, event: TransportEvent) -> Option<ScheduledReconnect> {
            let generation = self.generation(topic);
            self.mux.handle(LifecycleEvent {
                topic,
                generation,
                event,
            })
        }

        fn close(&mut self, topic: Topic) -> Option<ScheduledReconnect> {
            self.send(topic, TransportEvent::Closed { reason: None })
        }

        fn opens(&self) -> usize {
            self.connector.opened.lock().len()
        }

        fn states(&self, topic: Topic) -> Vec<ConnectionState> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    RealtimeEvent::ConnectionStateChanged { topic: t, state } if *t == topic => {
                        Some(*state)
                    }
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn subscribe_is_idempotent_while_live() {
        let mut h = Harness::new();
        let topic = Topic::Poll(3);

        assert!(h.mux.subscribe(topic));
        assert!(!h.mux.subscribe(topic));
        h.send(topic, TransportEvent::Opened);
        assert!(!h.mux.subscribe(topic));

        assert_eq!(h.opens(), 1);
        assert_eq!(
            h.connector.opened.lock()[0],
            "ws://localhost:8000/ws/3".to_string()
        );
        assert_eq!(h.mux.state(topic), Some(ConnectionState::Open));
    }

    #[test]
    fn topic_gives_up_after_five_failed_reconnects() {
        let mut h = Harness::new();
        let topic = Topic::Poll(9);
        h.mux.subscribe(topic);

        let mut delays = Vec::new();
        for _ in 0..5 {
            let scheduled = h.close(topic).expect("reconnect scheduled");
            delays.push(scheduled.delay.as_millis());
            assert!(h.mux.reconnect_due(topic, scheduled.generation));
        }
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000]);

        // Sixth consecutive close: no further attempt.
        assert_eq!(h.close(topic), None);
        assert_eq!(h.opens(), 6);

        let status = h.mux.status(topic).unwrap();
        assert_eq!(status.state, ConnectionState::Closed);
        assert_eq!(status.attempts, 5);
        assert!(status.abandoned);
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut h = Harness::new();
        let topic = Topic::Poll(9);
        h.mux.subscribe(topic);

        for _ in 0..3 {
            let scheduled = h.close(topic).unwrap();
            h.mux.reconnect_due(topic, scheduled.generation);
        }
        assert_eq!(h.mux.status(topic).unwrap().attempts, 3);

        h.send(topic, TransportEvent::Opened);
        assert_eq!(h.mux.status(topic).unwrap().attempts, 0);

        let scheduled = h.close(topic).unwrap();
        assert_eq!(scheduled.delay, Duration::from_millis(1000));
    }

    #[test]
    fn global_topic_retries_forever() {
        let mut h = Harness::new();
        h.mux.subscribe(Topic::Global);

        for _ in 0..50 {
            let scheduled = h.close(Topic::Global).expect("global always retries");
            assert_eq!(scheduled.delay, Duration::from_millis(3000));
            assert!(h.mux.reconnect_due(Topic::Global, scheduled.generation));
        }
        assert_eq!(h.opens(), 51);
        assert_eq!(
            h.connector.opened.lock()[0],
            "ws://localhost:8000/ws/0".to_string()
        );
    }

    #[test]
    fn explicit_subscribe_revives_abandoned_topic() {
        let mut h = Harness::new();
        let topic = Topic::Poll(2);
        h.mux.subscribe(topic);
        for _ in 0..5 {
            let scheduled = h.close(topic).unwrap();
            h.mux.reconnect_due(topic, scheduled.generation);
        }
        assert_eq!(h.close(topic), None);

        assert!(h.mux.subscribe(topic));
        assert_eq!(h.mux.status(topic).unwrap().attempts, 0);
        assert!(h.close(topic).is_some());
    }

    #[test]
    fn stale_events_and_timers_are_ignored() {
        let mut h = Harness::new();
        let topic = Topic::Poll(5);
        h.mux.subscribe(topic);
        let first = h.generation(topic);

        let scheduled = h.close(topic).unwrap();
        // Explicit subscribe wins the race against the pending timer.
        h.mux.subscribe(topic);
        assert!(!h.mux.reconnect_due(topic, scheduled.generation));

        // A late close from the first transport must not touch the new one.
        let stale = h.mux.handle(LifecycleEvent {
            topic,
            generation: first,
            event: TransportEvent::Closed { reason: None },
        });
        assert_eq!(stale, None);
        assert_eq!(h.mux.state(topic), Some(ConnectionState::Connecting));
        assert_eq!(h.opens(), 2);
    }

    #[test]
    fn unsubscribe_forgets_topic_and_closes_transport() {
        let mut h = Harness::new();
        let topic = Topic::Poll(8);
        h.mux.subscribe(topic);
        h.send(topic, TransportEvent::Opened);
        let generation = h.generation(topic);

        assert!(h.mux.unsubscribe(topic));
        assert!(!h.mux.unsubscribe(topic));
        assert_eq!(h.mux.state(topic), None);

        let mut outbound = h.connector.outbound.lock().remove(0);
        assert_eq!(outbound.try_next().unwrap(), Some(Outbound::Close));

        // The transport's own close arrives later and is ignored.
        let late = h.mux.handle(LifecycleEvent {
            topic,
            generation,
            event: TransportEvent::Closed { reason: None },
        });
        assert_eq!(late, None);
        assert_eq!(
            h.states(topic),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closed
            ]
        );
    }

    #[test]
    fn publish_only_sends_when_open() {
        let mut h = Harness::new();
        let topic = Topic::Poll(4);

        assert!(!h.mux.publish(topic, "early".into()));
        h.mux.subscribe(topic);
        assert!(!h.mux.publish(topic, "connecting".into()));
        h.send(topic, TransportEvent::Opened);
        assert!(h.mux.publish(topic, "hello".into()));

        let mut outbound = h.connector.outbound.lock().remove(0);
        assert_eq!(
            outbound.try_next().unwrap(),
            Some(Outbound::Text("hello".into()))
        );
    }

    #[test]
    fn frames_become_tagged_notifications() {
        let mut h = Harness::new();
        let topic = Topic::Global;
        h.mux.subscribe(topic);
        h.send(topic, TransportEvent::Opened);

        h.send(topic, TransportEvent::Frame("{broken".into()));
        h.send(
            topic,
            TransportEvent::Frame(r#"{"type":"something_new","poll_id":1}"#.into()),
        );
        h.send(
            topic,
            TransportEvent::Frame(r#"{"type":"poll_deleted","poll_id":11,"data":{}}"#.into()),
        );

        let notifications: Vec<_> = h
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RealtimeEvent::Notification {
                    topic,
                    notification,
                } => Some((*topic, notification.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            notifications,
            vec![(Topic::Global, Notification::deleted(11))]
        );
        // A malformed frame does not close the connection.
        assert_eq!(h.mux.state(topic), Some(ConnectionState::Open));
    }

    #[test]
    fn each_transition_emits_one_state_event() {
        let mut h = Harness::new();
        let topic = Topic::Poll(1);
        h.mux.subscribe(topic);
        h.send(topic, TransportEvent::Opened);
        let scheduled = h.close(topic).unwrap();
        // Duplicate close for the same transport.
        h.close(topic);
        h.mux.reconnect_due(topic, scheduled.generation);

        assert_eq!(
            h.states(topic),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closed,
                ConnectionState::Connecting,
            ]
        );
    }

    #[test]
    fn global_topic_survives_unsubscribe() {
        let mut h = Harness::new();
        h.mux.subscribe(Topic::Global);
        h.send(Topic::Global, TransportEvent::Opened);

        assert!(!h.mux.unsubscribe(Topic::Global));
        assert_eq!(h.mux.state(Topic::Global), Some(ConnectionState::Open));
        assert!(h.mux.publish(Topic::Global, "still here".into()));
    }

    #[test]
    fn shutdown_closes_everything() {
        let mut h = Harness::new();
        h.mux.subscribe(Topic::Global);
        h.mux.subscribe(Topic::Poll(1));
        h.mux.shutdown();
        assert_eq!(h.mux.topics().count(), 0);
    }
}

//! Async driver for the [`Multiplexer`].
//!
//! One task owns the multiplexer and processes, strictly one at a time:
//! commands from [`WsManager`] handles, transport lifecycle events, and fired
//! reconnect timers. Handlers run to completion, so no transition ever
//! interleaves with another.

use std::collections::HashMap;
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::future::{self, abortable, AbortHandle, Either};
use futures_util::{stream, StreamExt};
use parking_lot::RwLock;
use quickpoll_shared::Topic;
use serde::Serialize;

use super::connection::{Connector, Endpoint, LifecycleEvent, PlatformConnector, ReconnectSettings};
use super::multiplexer::{Multiplexer, RealtimeEvent, ScheduledReconnect, TopicStatus};
use crate::config::{ClientConfig, ConfigError};
use crate::dispatch::Dispatcher;
use crate::runtime;

#[derive(Debug)]
enum Command {
    Subscribe(Topic),
    Unsubscribe(Topic),
    Publish(Topic, String),
    Shutdown,
}

#[derive(Debug)]
enum Internal {
    Lifecycle(LifecycleEvent),
    ReconnectDue { topic: Topic, generation: u64 },
}

type Statuses = Arc<RwLock<HashMap<Topic, TopicStatus>>>;

/// Handle to the real-time connection layer. Cheap to clone; the event loop
/// stops and every transport closes once the last handle is dropped or
/// [`WsManager::shutdown`] is called.
#[derive(Clone)]
pub struct WsManager {
    commands: UnboundedSender<Command>,
    statuses: Statuses,
    dispatcher: Dispatcher<RealtimeEvent>,
}

impl WsManager {
    /// Start the event loop with the platform's WebSocket transport.
    pub fn connect(
        config: &ClientConfig,
        dispatcher: Dispatcher<RealtimeEvent>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::spawn(
            config.endpoint()?,
            config.reconnect,
            Arc::new(PlatformConnector),
            dispatcher,
        ))
    }

    /// Start the event loop with an arbitrary connector.
    pub fn spawn(
        endpoint: Endpoint,
        settings: ReconnectSettings,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher<RealtimeEvent>,
    ) -> Self {
        let (commands, command_rx) = unbounded();
        let (lifecycle, lifecycle_rx) = unbounded();
        let statuses: Statuses = Arc::default();

        let multiplexer = Multiplexer::new(
            endpoint,
            settings,
            connector,
            dispatcher.clone(),
            lifecycle,
        );
        runtime::spawn(run_loop(
            multiplexer,
            command_rx,
            lifecycle_rx,
            statuses.clone(),
        ));

        Self {
            commands,
            statuses,
            dispatcher,
        }
    }

    /// Open (or keep) the connection for `topic`.
    pub fn subscribe(&self, topic: Topic) {
        self.send(Command::Subscribe(topic));
    }

    /// Connect the process-wide broadcast channel.
    pub fn subscribe_global(&self) {
        self.subscribe(Topic::Global);
    }

    /// Drop a poll topic. The global topic ignores this; see [`shutdown`](Self::shutdown).
    pub fn unsubscribe(&self, topic: Topic) {
        self.send(Command::Unsubscribe(topic));
    }

    /// Fire-and-forget send. Dropped unless the topic is open when the
    /// event loop gets to it.
    pub fn publish<T: Serialize>(&self, topic: Topic, message: &T) {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Command::Publish(topic, json)),
            Err(e) => crate::log_error!("Serialize failed for {}: {}", topic, e),
        }
    }

    /// Close every connection and stop the event loop.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Last known status of `topic`. `None` if it has no connection entry.
    pub fn status(&self, topic: Topic) -> Option<TopicStatus> {
        self.statuses.read().get(&topic).copied()
    }

    pub fn is_connected(&self, topic: Topic) -> bool {
        self.status(topic).is_some_and(|s| s.state.is_open())
    }

    pub fn dispatcher(&self) -> &Dispatcher<RealtimeEvent> {
        &self.dispatcher
    }

    fn send(&self, command: Command) {
        if self.commands.unbounded_send(command).is_err() {
            crate::log_debug!("WsManager event loop already stopped");
        }
    }
}

async fn run_loop(
    mut multiplexer: Multiplexer,
    mut commands: UnboundedReceiver<Command>,
    lifecycle: UnboundedReceiver<LifecycleEvent>,
    statuses: Statuses,
) {
    let (timer_tx, timer_rx) = unbounded::<(Topic, u64)>();
    let mut internal = stream::select(
        lifecycle.map(Internal::Lifecycle),
        timer_rx.map(|(topic, generation)| Internal::ReconnectDue { topic, generation }),
    );
    let mut timers: HashMap<Topic, AbortHandle> = HashMap::new();

    loop {
        let step = match future::select(commands.next(), internal.next()).await {
            Either::Left((Some(command), _)) => Either::Left(command),
            Either::Left((None, _)) => break,
            Either::Right((Some(event), _)) => Either::Right(event),
            Either::Right((None, _)) => break,
        };

        match step {
            Either::Left(Command::Subscribe(topic)) => {
                if multiplexer.subscribe(topic) {
                    cancel_timer(&mut timers, topic);
                }
            }
            Either::Left(Command::Unsubscribe(topic)) => {
                if multiplexer.unsubscribe(topic) {
                    cancel_timer(&mut timers, topic);
                }
            }
            Either::Left(Command::Publish(topic, message)) => {
                multiplexer.publish(topic, message);
            }
            Either::Left(Command::Shutdown) => break,
            Either::Right(Internal::Lifecycle(event)) => {
                if let Some(reconnect) = multiplexer.handle(event) {
                    schedule(&mut timers, &timer_tx, reconnect);
                }
            }
            Either::Right(Internal::ReconnectDue { topic, generation }) => {
                timers.remove(&topic);
                multiplexer.reconnect_due(topic, generation);
            }
        }

        *statuses.write() = multiplexer.statuses();
    }

    for (_, timer) in timers.drain() {
        timer.abort();
    }
    multiplexer.shutdown();
    statuses.write().clear();
    crate::log_info!("WsManager event loop stopped");
}

fn schedule(
    timers: &mut HashMap<Topic, AbortHandle>,
    timer_tx: &UnboundedSender<(Topic, u64)>,
    reconnect: ScheduledReconnect,
) {
    let ScheduledReconnect {
        topic,
        generation,
        delay,
    } = reconnect;
    let timer_tx = timer_tx.clone();
    let (timer, handle) = abortable(async move {
        runtime::sleep(delay).await;
        let _ = timer_tx.unbounded_send((topic, generation));
    });

    if let Some(previous) = timers.insert(topic, handle) {
        previous.abort();
    }
    runtime::spawn(async move {
        let _ = timer.await;
    });
}

fn cancel_timer(timers: &mut HashMap<Topic, AbortHandle>, topic: Topic) {
    if let Some(timer) = timers.remove(&topic) {
        timer.abort();
    }
}

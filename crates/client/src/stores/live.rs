//! A [`PollCollection`] kept current by realtime notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use quickpoll_shared::{ApiError, Poll, PollId, PollStatus, Topic};

use super::polls::{Change, PollCollection};
use crate::api_client::ApiClient;
use crate::dispatch::{Dispatcher, Subscription};
use crate::ws::{ConnectionState, RealtimeEvent};

/// Which notifications a [`LivePolls`] merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every poll; a list view.
    All,
    /// One poll; a detail view.
    Poll(PollId),
}

impl Scope {
    fn accepts(&self, poll_id: PollId) -> bool {
        match self {
            Scope::All => true,
            Scope::Poll(id) => *id == poll_id,
        }
    }

    /// Whether a (re)opened `topic` may have carried notifications we missed.
    fn fed_by(&self, topic: Topic) -> bool {
        match (self, topic) {
            (_, Topic::Global) => true,
            (Scope::Poll(id), Topic::Poll(other)) => *id == other,
            (Scope::All, Topic::Poll(_)) => false,
        }
    }
}

pub struct LivePolls {
    scope: Scope,
    state: Arc<RwLock<PollCollection>>,
    stale: Arc<AtomicBool>,
    changes: Dispatcher<Change>,
    subscription: Option<Subscription>,
}

impl LivePolls {
    /// Start merging notifications from `events`. The collection starts
    /// empty and stale until [`initialize`](Self::initialize) or
    /// [`refresh`](Self::refresh).
    pub fn attach(events: &Dispatcher<RealtimeEvent>, scope: Scope) -> Self {
        let state: Arc<RwLock<PollCollection>> = Arc::default();
        let stale = Arc::new(AtomicBool::new(true));
        let changes = Dispatcher::new();

        let subscription = {
            let state = state.clone();
            let stale = stale.clone();
            let changes = changes.clone();
            events.register(move |event| match event {
                RealtimeEvent::Notification { notification, .. } => {
                    if !scope.accepts(notification.poll_id()) {
                        return;
                    }
                    let change = state.write().apply(notification);
                    if change.is_change() {
                        changes.publish(&change);
                    }
                }
                RealtimeEvent::ConnectionStateChanged { topic, state: now } => {
                    if *now == ConnectionState::Open && scope.fed_by(*topic) {
                        stale.store(true, Ordering::SeqCst);
                    }
                }
            })
        };

        Self {
            scope,
            state,
            stale,
            changes,
            subscription: Some(subscription),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Replace the collection with a full listing.
    pub fn initialize(&self, listing: Vec<Poll>) {
        let scope = self.scope;
        let listing = listing.into_iter().filter(|p| scope.accepts(p.id)).collect();
        self.state.write().initialize(listing);
        self.stale.store(false, Ordering::SeqCst);
    }

    /// Reload from the server. A detail view fetches its one poll; `status`
    /// only applies to list views.
    pub async fn refresh(&self, api: &ApiClient, status: PollStatus) -> Result<usize, ApiError> {
        let listing = match self.scope {
            Scope::All => api.list_polls(status).await?,
            Scope::Poll(id) => vec![api.get_poll(id).await?],
        };
        let count = listing.len();
        self.initialize(listing);
        Ok(count)
    }

    /// Set when a connection feeding this view (re)opened after the last
    /// listing; a refresh closes the gap.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PollCollection> {
        self.state.read()
    }

    /// Direct access for tentative changes.
    pub fn write(&self) -> RwLockWriteGuard<'_, PollCollection> {
        self.state.write()
    }

    pub fn snapshot(&self) -> Vec<Poll> {
        self.state.read().iter().cloned().collect()
    }

    /// Changes merged from notifications.
    pub fn changes(&self) -> &Dispatcher<Change> {
        &self.changes
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Stop merging notifications. The collection keeps its last state.
    pub fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
    }
}

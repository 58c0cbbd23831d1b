//! Anonymous visitor identity.
//!
//! Every request to the backend carries a visitor id. The resolver derives it
//! once per process, in this order:
//!
//! 1. a cached fingerprint younger than [`FINGERPRINT_CACHE_TTL`],
//! 2. a fresh device fingerprint (bounded by a timeout),
//! 3. a persisted random id, generated on first use.
//!
//! Concurrent callers share one computation. [`IdentityResolver::reset`]
//! forgets everything so the next resolution starts from scratch.

mod fingerprint;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::{self, Either, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use fingerprint::{
    derive, Characteristic, DeviceFingerprint, FingerprintError, FingerprintSource,
};

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::runtime;
use crate::storage::{self, KeyValueStore, PlatformStorage};

pub const SESSION_KEY: &str = "poll_session_id";
pub const CREATED_KEY: &str = "poll_session_id_created";
pub const LAST_ACTIVE_KEY: &str = "poll_session_id_last_active";
pub const FINGERPRINT_CACHE_KEY: &str = "poll_fingerprint_cache";

pub const FINGERPRINT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const ALL_KEYS: [&str; 4] = [SESSION_KEY, CREATED_KEY, LAST_ACTIVE_KEY, FINGERPRINT_CACHE_KEY];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintCache {
    visitor_id: String,
    /// Unix milliseconds.
    timestamp: i64,
}

impl FingerprintCache {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.timestamp_millis() - self.timestamp;
        (0..FINGERPRINT_CACHE_TTL.as_millis() as i64).contains(&age)
    }
}

/// Where an identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Cached,
    Fingerprint,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub fingerprint_id: String,
    /// First time this device was seen.
    pub created_at: DateTime<Utc>,
    pub source: IdentitySource,
}

/// Result of a non-blocking lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(Identity),
    /// Nothing persisted yet; call [`IdentityResolver::resolve`].
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    Active {
        fingerprint_id: String,
        at: DateTime<Utc>,
    },
    Reset {
        previous: Option<String>,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub fingerprint_id: String,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
}

#[cfg(not(target_arch = "wasm32"))]
type PendingIdentity = Shared<futures_util::future::BoxFuture<'static, Identity>>;
#[cfg(target_arch = "wasm32")]
type PendingIdentity = Shared<futures_util::future::LocalBoxFuture<'static, Identity>>;

pub struct IdentityResolver {
    storage: Arc<dyn KeyValueStore>,
    source: Arc<dyn FingerprintSource>,
    timeout: Duration,
    inflight: Mutex<Option<PendingIdentity>>,
    epoch: Arc<AtomicU64>,
    events: Dispatcher<IdentityEvent>,
}

impl IdentityResolver {
    pub fn new(storage: Arc<dyn KeyValueStore>, source: Arc<dyn FingerprintSource>) -> Self {
        Self {
            storage,
            source,
            timeout: crate::config::DEFAULT_FINGERPRINT_TIMEOUT,
            inflight: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
            events: Dispatcher::new(),
        }
    }

    /// Resolver backed by the platform store and device fingerprint.
    pub fn platform(config: &ClientConfig) -> Self {
        Self::new(Arc::new(PlatformStorage::new()), Arc::new(DeviceFingerprint))
            .with_timeout(config.fingerprint_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn events(&self) -> &Dispatcher<IdentityEvent> {
        &self.events
    }

    /// The visitor identity. Never fails: if fingerprinting is unavailable
    /// a random id is generated and persisted instead.
    pub async fn resolve(&self) -> Identity {
        let pending = self
            .inflight
            .lock()
            .get_or_insert_with(|| self.start())
            .clone();
        pending.await
    }

    fn start(&self) -> PendingIdentity {
        let storage = self.storage.clone();
        let source = self.source.clone();
        let timeout = self.timeout;
        let epoch = self.epoch.clone();
        let started_in = epoch.load(Ordering::SeqCst);

        let work = async move {
            let current = || epoch.load(Ordering::SeqCst) == started_in;
            compute(storage.as_ref(), source.as_ref(), timeout, current).await
        };

        #[cfg(not(target_arch = "wasm32"))]
        let work = work.boxed();
        #[cfg(target_arch = "wasm32")]
        let work = work.boxed_local();
        work.shared()
    }

    /// Whatever is already persisted, without computing anything.
    pub fn resolve_sync(&self) -> Resolution {
        let now = Utc::now();
        let created_at = read_time(self.storage.as_ref(), CREATED_KEY).unwrap_or(now);

        if let Some(cache) = fresh_cache(self.storage.as_ref(), now) {
            return Resolution::Ready(Identity {
                fingerprint_id: cache.visitor_id,
                created_at,
                source: IdentitySource::Cached,
            });
        }
        match self.storage.get(SESSION_KEY) {
            Some(id) if !id.is_empty() => Resolution::Ready(Identity {
                fingerprint_id: id,
                created_at,
                source: IdentitySource::Fallback,
            }),
            _ => Resolution::Pending,
        }
    }

    /// Forget the identity. The next [`resolve`](Self::resolve) recomputes it.
    pub fn reset(&self) {
        let previous = match self.resolve_sync() {
            Resolution::Ready(identity) => Some(identity.fingerprint_id),
            Resolution::Pending => None,
        };

        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.inflight.lock().take();
        for key in ALL_KEYS {
            self.storage.remove(key);
        }
        self.source.reset();

        crate::log_info!("Visitor identity reset");
        self.events.publish(&IdentityEvent::Reset {
            previous,
            at: Utc::now(),
        });
    }

    /// Record activity: stamps the last-active time and, on first use, the
    /// creation time.
    pub async fn mark_active(&self) -> Identity {
        let identity = self.resolve().await;
        let now = Utc::now();

        if !self.storage.exists(CREATED_KEY) {
            write_time(self.storage.as_ref(), CREATED_KEY, now);
        }
        write_time(self.storage.as_ref(), LAST_ACTIVE_KEY, now);

        self.events.publish(&IdentityEvent::Active {
            fingerprint_id: identity.fingerprint_id.clone(),
            at: now,
        });
        identity
    }

    /// Short human label such as `visitor_1a2b3c4d`.
    pub async fn display_name(&self) -> String {
        display_name_for(&self.resolve().await.fingerprint_id)
    }

    pub async fn session_info(&self) -> SessionInfo {
        let identity = self.resolve().await;
        SessionInfo {
            display_name: display_name_for(&identity.fingerprint_id),
            fingerprint_id: identity.fingerprint_id,
            created_at: read_time(self.storage.as_ref(), CREATED_KEY),
            last_active: read_time(self.storage.as_ref(), LAST_ACTIVE_KEY),
        }
    }
}

async fn compute(
    storage: &dyn KeyValueStore,
    source: &dyn FingerprintSource,
    timeout: Duration,
    still_current: impl Fn() -> bool,
) -> Identity {
    let now = Utc::now();
    let seen = read_time(storage, CREATED_KEY);

    if let Some(cache) = fresh_cache(storage, now) {
        crate::log_debug!("Using cached fingerprint");
        return Identity {
            fingerprint_id: cache.visitor_id,
            created_at: record_first_seen(storage, seen, now, &still_current),
            source: IdentitySource::Cached,
        };
    }

    let (fingerprint_id, origin) = match fingerprint_within(source, timeout).await {
        Ok(visitor_id) => {
            // A reset during the computation invalidates what we would persist.
            if still_current() {
                let cache = FingerprintCache {
                    visitor_id: visitor_id.clone(),
                    timestamp: Utc::now().timestamp_millis(),
                };
                storage::save(storage, FINGERPRINT_CACHE_KEY, &cache);
            }
            (visitor_id, IdentitySource::Fingerprint)
        }
        Err(e) => {
            crate::log_warn!("Fingerprinting failed, using fallback id: {}", e);
            (fallback_id(storage, &still_current), IdentitySource::Fallback)
        }
    };

    Identity {
        fingerprint_id,
        created_at: record_first_seen(storage, seen, now, &still_current),
        source: origin,
    }
}

async fn fingerprint_within(
    source: &dyn FingerprintSource,
    timeout: Duration,
) -> Result<String, FingerprintError> {
    let deadline = Box::pin(runtime::sleep(timeout));
    match future::select(source.compute(), deadline).await {
        Either::Left((result, _)) => result,
        Either::Right(_) => Err(FingerprintError::TimedOut(timeout)),
    }
}

fn fallback_id(storage: &dyn KeyValueStore, still_current: &impl Fn() -> bool) -> String {
    if !still_current() {
        return uuid::Uuid::new_v4().to_string();
    }
    if let Some(id) = storage.get(SESSION_KEY).filter(|id| !id.is_empty()) {
        return id;
    }
    let id = uuid::Uuid::new_v4().to_string();
    if !storage.set(SESSION_KEY, &id) {
        crate::log_warn!("Could not persist fallback visitor id");
    }
    id
}

fn fresh_cache(storage: &dyn KeyValueStore, now: DateTime<Utc>) -> Option<FingerprintCache> {
    storage::load::<FingerprintCache>(storage, FINGERPRINT_CACHE_KEY)
        .filter(|cache| !cache.visitor_id.is_empty() && cache.is_fresh(now))
}

fn record_first_seen(
    storage: &dyn KeyValueStore,
    seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    still_current: &impl Fn() -> bool,
) -> DateTime<Utc> {
    match seen {
        Some(at) if still_current() => at,
        Some(_) => now,
        None => {
            if still_current() {
                write_time(storage, CREATED_KEY, now);
            }
            now
        }
    }
}

fn read_time(storage: &dyn KeyValueStore, key: &str) -> Option<DateTime<Utc>> {
    let raw = storage.get(key)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Some(at.with_timezone(&Utc));
    }
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn write_time(storage: &dyn KeyValueStore, key: &str, at: DateTime<Utc>) {
    storage.set(key, &at.to_rfc3339());
}

fn display_name_for(fingerprint_id: &str) -> String {
    let short: String = fingerprint_id.chars().take(8).collect();
    format!("visitor_{short}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: AtomicUsize,
        result: Result<String, FingerprintError>,
    }

    impl Counting {
        fn ok(id: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Ok(id.to_string()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Err(FingerprintError::Unavailable),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FingerprintSource for Counting {
        async fn compute(&self) -> Result<String, FingerprintError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.result.clone()
        }
    }

    struct Stalled;

    #[async_trait]
    impl FingerprintSource for Stalled {
        async fn compute(&self) -> Result<String, FingerprintError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".into())
        }
    }

    struct Slow {
        delay: Duration,
        result: Result<String, FingerprintError>,
        calls: AtomicUsize,
    }

    impl Slow {
        fn new(result: Result<String, FingerprintError>) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(50),
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FingerprintSource for Slow {
        async fn compute(&self) -> Result<String, FingerprintError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    /// Start a resolution, reset 10ms into it and wait for the stale result.
    async fn resolve_across_reset(resolver: &IdentityResolver) -> Identity {
        let (stale, ()) = tokio::join!(resolver.resolve(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.reset();
        });
        stale
    }

    fn resolver(storage: &Arc<MemoryStorage>, source: Arc<dyn FingerprintSource>) -> IdentityResolver {
        IdentityResolver::new(storage.clone(), source)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let storage = Arc::new(MemoryStorage::new());
        let source = Counting::ok("abcdef0123456789");
        let resolver = resolver(&storage, source.clone());

        let (a, b) = futures_util::join!(resolver.resolve(), resolver.resolve());
        assert_eq!(a, b);
        assert_eq!(a.source, IdentitySource::Fingerprint);
        assert_eq!(source.calls(), 1);

        resolver.resolve().await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_cache_skips_fingerprinting() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = FingerprintCache {
            visitor_id: "cached-id".into(),
            timestamp: Utc::now().timestamp_millis() - 60_000,
        };
        storage::save(storage.as_ref(), FINGERPRINT_CACHE_KEY, &cache);

        let source = Counting::ok("fresh-id");
        let identity = resolver(&storage, source.clone()).resolve().await;

        assert_eq!(identity.fingerprint_id, "cached-id");
        assert_eq!(identity.source, IdentitySource::Cached);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn stale_cache_is_recomputed() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = FingerprintCache {
            visitor_id: "old-id".into(),
            timestamp: Utc::now().timestamp_millis() - 25 * 60 * 60 * 1000,
        };
        storage::save(storage.as_ref(), FINGERPRINT_CACHE_KEY, &cache);

        let source = Counting::ok("new-id");
        let identity = resolver(&storage, source.clone()).resolve().await;

        assert_eq!(identity.fingerprint_id, "new-id");
        assert_eq!(source.calls(), 1);
        let stored: FingerprintCache =
            storage::load(storage.as_ref(), FINGERPRINT_CACHE_KEY).unwrap();
        assert_eq!(stored.visitor_id, "new-id");
    }

    #[tokio::test]
    async fn fallback_id_survives_restarts() {
        let storage = Arc::new(MemoryStorage::new());

        let first = resolver(&storage, Counting::failing()).resolve().await;
        assert_eq!(first.source, IdentitySource::Fallback);
        assert!(uuid::Uuid::parse_str(&first.fingerprint_id).is_ok());
        assert_eq!(storage.get(SESSION_KEY), Some(first.fingerprint_id.clone()));

        let second = resolver(&storage, Counting::failing()).resolve().await;
        assert_eq!(second.fingerprint_id, first.fingerprint_id);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fingerprint_times_out_to_fallback() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&storage, Arc::new(Stalled)).with_timeout(Duration::from_secs(5));

        let identity = resolver.resolve().await;
        assert_eq!(identity.source, IdentitySource::Fallback);
        assert!(!storage.exists(FINGERPRINT_CACHE_KEY));
    }

    #[tokio::test]
    async fn resolve_sync_reports_pending_until_something_is_stored() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&storage, Counting::ok("device-1"));

        assert_eq!(resolver.resolve_sync(), Resolution::Pending);
        let identity = resolver.resolve().await;

        match resolver.resolve_sync() {
            Resolution::Ready(ready) => assert_eq!(ready.fingerprint_id, identity.fingerprint_id),
            Resolution::Pending => panic!("identity should be ready"),
        }
    }

    #[tokio::test]
    async fn reset_clears_state_and_notifies() {
        let storage = Arc::new(MemoryStorage::new());
        let source = Counting::failing();
        let resolver = resolver(&storage, source.clone());
        let first = resolver.mark_active().await;
        assert!(storage.exists(LAST_ACTIVE_KEY));

        let events = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let events = events.clone();
            resolver.events().register(move |e| events.lock().push(e.clone()))
        };

        resolver.reset();
        assert!(storage.is_empty());
        assert!(matches!(
            events.lock().as_slice(),
            [IdentityEvent::Reset { previous: Some(id), .. }] if *id == first.fingerprint_id
        ));

        let second = resolver.resolve().await;
        assert_ne!(second.fingerprint_id, first.fingerprint_id);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_fallback_resolution_rotates_the_id() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&storage, Slow::new(Err(FingerprintError::Unavailable)));

        let stale = resolve_across_reset(&resolver).await;
        assert_eq!(stale.source, IdentitySource::Fallback);
        assert!(storage.is_empty());

        let next = resolver.resolve().await;
        assert_eq!(next.source, IdentitySource::Fallback);
        assert_ne!(next.fingerprint_id, stale.fingerprint_id);
        assert_eq!(storage.get(SESSION_KEY), Some(next.fingerprint_id));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_fingerprinting_persists_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let source = Slow::new(Ok("device-a".into()));
        let resolver = resolver(&storage, source.clone());

        let stale = resolve_across_reset(&resolver).await;
        assert_eq!(stale.fingerprint_id, "device-a");
        assert!(storage.is_empty());

        let next = resolver.resolve().await;
        assert_eq!(next.source, IdentitySource::Fingerprint);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(storage.exists(FINGERPRINT_CACHE_KEY));
        assert!(storage.exists(CREATED_KEY));
    }

    #[tokio::test]
    async fn session_info_and_display_name() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = resolver(&storage, Counting::ok("1a2b3c4d5e6f7a8b"));

        assert_eq!(resolver.display_name().await, "visitor_1a2b3c4d");

        resolver.mark_active().await;
        let info = resolver.session_info().await;
        assert_eq!(info.fingerprint_id, "1a2b3c4d5e6f7a8b");
        assert_eq!(info.display_name, "visitor_1a2b3c4d");
        assert!(info.created_at.is_some());
        assert!(info.last_active.is_some());
    }
}

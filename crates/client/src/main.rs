//! quickpoll-watch: follow the live poll listing from a terminal.
//!
//! ```text
//! quickpoll-watch          # every active poll
//! quickpoll-watch 42       # poll 42 only
//! ```

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use quickpoll_client::{
        log_info, ApiClient, ClientConfig, Dispatcher, IdentityResolver, LivePolls, Scope,
        WsManager,
    };
    use quickpoll_shared::{PollId, Topic};

    quickpoll_client::logging::init("quickpoll_client=info");

    let config = ClientConfig::from_env();
    config.validate().context("invalid configuration")?;

    let poll_id = std::env::args()
        .nth(1)
        .map(|arg| {
            arg.parse::<PollId>()
                .with_context(|| format!("`{arg}` is not a poll id"))
        })
        .transpose()?;

    let identity = Arc::new(IdentityResolver::platform(&config));
    identity.mark_active().await;
    log_info!("Watching as {}", identity.display_name().await);

    let api = ApiClient::new(&config.api_base_url, identity.clone());
    let events = Dispatcher::new();
    let scope = poll_id.map_or(Scope::All, Scope::Poll);
    let live = Arc::new(LivePolls::attach(&events, scope));

    let _changes = {
        let observed = Arc::downgrade(&live);
        live.changes().register(move |change| {
            if let Some(live) = observed.upgrade() {
                log_info!("{:?} ({} polls)", change, live.read().len());
            }
        })
    };

    let ws = WsManager::connect(&config, events).context("cannot start the push channel")?;
    ws.subscribe_global();
    if let Some(id) = poll_id {
        ws.subscribe(Topic::Poll(id));
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut tick = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick.tick() => {
                if live.is_stale() {
                    watch::refresh(&live, &api).await;
                }
            }
        }
    }

    log_info!("Shutting down");
    ws.shutdown();
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
mod watch {
    use chrono::Utc;
    use quickpoll_client::{log_info, log_warn, ApiClient, LivePolls};
    use quickpoll_shared::PollStatus;

    pub async fn refresh(live: &LivePolls, api: &ApiClient) {
        match live.refresh(api, PollStatus::Active).await {
            Ok(count) => {
                log_info!("Loaded {} polls", count);
                let polls = live.read();
                for poll in polls.project(PollStatus::Active, Utc::now()) {
                    log_info!(
                        "  #{} {} | {} votes, {} likes",
                        poll.id,
                        poll.title,
                        poll.total_votes,
                        poll.total_likes
                    );
                }
            }
            Err(e) => log_warn!("Refresh failed: {}", e.user_message()),
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

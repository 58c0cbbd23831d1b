//! HTTP API client. Every request carries the visitor id in `X-Session-ID`.

use std::sync::Arc;

use quickpoll_shared::{
    ApiError, LikeReceipt, Poll, PollCreate, PollId, PollLikeCreate, PollStatus, VoteCreate,
    VoteReceipt, HEADER_SESSION_ID, MAX_EXPIRES_IN,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::identity::IdentityResolver;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    identity: Arc<IdentityResolver>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, identity: Arc<IdentityResolver>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            identity,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let session_id = self.identity.resolve().await.fingerprint_id;
        self.client
            .request(method, self.url(path))
            .header(HEADER_SESSION_ID, session_id)
    }

    async fn send<TRes: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            crate::log_warn!("API request failed with HTTP {}", status);
            return Err(ApiError::Http { status, body: text });
        }

        let text = if text.is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.request(Method::GET, path).await;
        self.send(rb).await
    }

    async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.request(Method::POST, path).await.json(body);
        self.send(rb).await
    }

    /// Polls with the given status, newest first.
    pub async fn list_polls(&self, status: PollStatus) -> Result<Vec<Poll>, ApiError> {
        self.get_json(&format!("/polls?status={}", urlencoding::encode(status.as_str())))
            .await
    }

    pub async fn get_poll(&self, poll_id: PollId) -> Result<Poll, ApiError> {
        self.get_json(&format!("/polls/{poll_id}")).await
    }

    /// Create a poll. Blank options are dropped and the title trimmed before
    /// sending; requests the server would reject fail locally.
    pub async fn create_poll(&self, poll: &PollCreate) -> Result<Poll, ApiError> {
        let poll = prepare(poll)?;
        self.post_json("/polls", &poll).await
    }

    pub async fn vote(&self, vote: &VoteCreate) -> Result<VoteReceipt, ApiError> {
        self.post_json("/votes", vote).await
    }

    pub async fn like(&self, poll_id: PollId) -> Result<LikeReceipt, ApiError> {
        self.post_json("/likes", &PollLikeCreate { poll_id }).await
    }

    pub async fn unlike(&self, poll_id: PollId) -> Result<(), ApiError> {
        let rb = self.request(Method::DELETE, &format!("/likes/{poll_id}")).await;
        self.send::<serde_json::Value>(rb).await.map(|_| ())
    }
}

fn prepare(poll: &PollCreate) -> Result<PollCreate, ApiError> {
    let title = poll.title.trim();
    if title.is_empty() {
        return Err(ApiError::Invalid("a poll needs a title".into()));
    }

    let options: Vec<String> = poll
        .options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < 2 {
        return Err(ApiError::Invalid("a poll needs at least two options".into()));
    }

    if let Some(expires_in) = poll.expires_in {
        if !(1..=MAX_EXPIRES_IN).contains(&expires_in) {
            return Err(ApiError::Invalid(format!(
                "expiry must be between 1 and {MAX_EXPIRES_IN} seconds"
            )));
        }
    }

    Ok(PollCreate {
        title: title.to_string(),
        description: poll
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        options,
        booster: poll.booster,
        expires_in: poll.expires_in,
    })
}

//! Shared data models for polls, votes and likes.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type PollId = i64;
pub type OptionId = i64;
pub type UserId = i64;

// --- Timestamps ---

/// Timestamps arrive either as RFC3339 or as naive ISO-8601 (no offset).
/// Naive values are taken to be UTC.
pub mod timestamp {
    use super::*;

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// --- Polls ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
    #[serde(default)]
    pub poll_id: Option<PollId>,
    #[serde(default)]
    pub vote_count: i64,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub percentage: i64,
}

/// A poll as held locally. The server is authoritative for every field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub booster: bool,
    /// Lifetime in seconds, counted from `created_at`.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub total_votes: i64,
    #[serde(default)]
    pub total_likes: i64,
    #[serde(default)]
    pub user_liked: bool,
    #[serde(default)]
    pub user_voted_option_id: Option<OptionId>,
}

fn default_true() -> bool {
    true
}

impl Poll {
    /// Instant after which the poll no longer accepts votes, if it expires at all.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| self.created_at + Duration::seconds(secs))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    /// Overwrite every field the snapshot carries. Fields absent from the
    /// snapshot keep their local value.
    pub fn merge(&mut self, snapshot: PollSnapshot) {
        let PollSnapshot {
            id,
            created_at,
            title,
            description,
            is_active,
            user_id,
            username,
            booster,
            expires_in,
            options,
            total_votes,
            total_likes,
            user_liked,
            user_voted_option_id,
        } = snapshot;

        debug_assert_eq!(self.id, id);
        self.created_at = created_at;
        if let Some(title) = title {
            self.title = title;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(is_active) = is_active {
            self.is_active = is_active;
        }
        if let Some(user_id) = user_id {
            self.user_id = user_id;
        }
        if let Some(username) = username {
            self.username = username;
        }
        if let Some(booster) = booster {
            self.booster = booster;
        }
        if let Some(expires_in) = expires_in {
            self.expires_in = expires_in;
        }
        if let Some(options) = options {
            self.options = options;
        }
        if let Some(total_votes) = total_votes {
            self.total_votes = total_votes;
        }
        if let Some(total_likes) = total_likes {
            self.total_likes = total_likes;
        }
        if let Some(user_liked) = user_liked {
            self.user_liked = user_liked;
        }
        if let Some(voted) = user_voted_option_id {
            self.user_voted_option_id = voted;
        }
    }
}

/// A pushed poll snapshot. Only `id` and `created_at` are guaranteed; the
/// remaining fields are present when the server sent them. Nullable fields
/// use `Option<Option<T>>` so an explicit `null` still clears the local value.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PollSnapshot {
    pub id: PollId,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default, deserialize_with = "present")]
    pub username: Option<Option<String>>,
    #[serde(default)]
    pub booster: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub expires_in: Option<Option<i64>>,
    #[serde(default)]
    pub options: Option<Vec<PollOption>>,
    #[serde(default)]
    pub total_votes: Option<i64>,
    #[serde(default)]
    pub total_likes: Option<i64>,
    #[serde(default)]
    pub user_liked: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub user_voted_option_id: Option<Option<OptionId>>,
}

impl PollSnapshot {
    /// Materialize a poll that was not held locally, defaulting whatever the
    /// snapshot left out.
    pub fn into_poll(self) -> Poll {
        let mut poll = Poll {
            id: self.id,
            title: String::new(),
            description: None,
            is_active: true,
            created_at: self.created_at,
            user_id: 0,
            username: None,
            booster: false,
            expires_in: None,
            options: Vec::new(),
            total_votes: 0,
            total_likes: 0,
            user_liked: false,
            user_voted_option_id: None,
        };
        poll.merge(self);
        poll
    }
}

impl From<Poll> for PollSnapshot {
    fn from(poll: Poll) -> Self {
        Self {
            id: poll.id,
            created_at: poll.created_at,
            title: Some(poll.title),
            description: Some(poll.description),
            is_active: Some(poll.is_active),
            user_id: Some(poll.user_id),
            username: Some(poll.username),
            booster: Some(poll.booster),
            expires_in: Some(poll.expires_in),
            options: Some(poll.options),
            total_votes: Some(poll.total_votes),
            total_likes: Some(poll.total_likes),
            user_liked: Some(poll.user_liked),
            user_voted_option_id: Some(poll.user_voted_option_id),
        }
    }
}

/// Listing filter understood by the server and by local projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    #[default]
    Active,
    Expired,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Active => "active",
            PollStatus::Expired => "expired",
        }
    }

    pub fn matches(&self, poll: &Poll, now: DateTime<Utc>) -> bool {
        let live = poll.is_active && !poll.is_expired(now);
        match self {
            PollStatus::Active => live,
            PollStatus::Expired => !live,
        }
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Requests ---

/// Longest allowed poll lifetime in seconds.
pub const MAX_EXPIRES_IN: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollCreate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub options: Vec<String>,
    #[serde(default)]
    pub booster: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteCreate {
    pub poll_id: PollId,
    pub option_id: OptionId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollLikeCreate {
    pub poll_id: PollId,
}

// --- Receipts ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteReceipt {
    pub id: i64,
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub user_id: UserId,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LikeReceipt {
    pub id: i64,
    pub poll_id: PollId,
    pub user_id: UserId,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
}

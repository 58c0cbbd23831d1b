//! Push-channel protocol: topics, inbound frames and typed notifications.

use serde::Deserialize;

use crate::error::FrameError;
use crate::models::{PollId, PollSnapshot};

/// Header carrying the anonymous session identifier on every HTTP request.
pub const HEADER_SESSION_ID: &str = "X-Session-ID";

/// Wire id reserved for the process-wide broadcast channel.
pub const GLOBAL_TOPIC_ID: PollId = 0;

/// Key of a push channel: one specific poll, or the global broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Global,
    Poll(PollId),
}

impl Topic {
    /// Map a wire id to a topic; id 0 is always the global channel.
    pub fn from_wire_id(id: PollId) -> Self {
        if id == GLOBAL_TOPIC_ID {
            Topic::Global
        } else {
            Topic::Poll(id)
        }
    }

    pub fn wire_id(&self) -> PollId {
        match self {
            Topic::Global => GLOBAL_TOPIC_ID,
            Topic::Poll(id) => *id,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Topic::Global)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Global => f.write_str("global"),
            Topic::Poll(id) => write!(f, "poll:{id}"),
        }
    }
}

/// What changed about a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Created,
    Updated,
    VoteCast,
    LikeAdded,
    LikeRemoved,
    Deleted,
}

impl NotificationKind {
    /// Classify a frame `type` tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "poll_created" => Some(Self::Created),
            "poll_update" => Some(Self::Updated),
            "vote_cast" => Some(Self::VoteCast),
            "poll_liked" => Some(Self::LikeAdded),
            "poll_unliked" => Some(Self::LikeRemoved),
            "poll_deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Created => "poll_created",
            Self::Updated => "poll_update",
            Self::VoteCast => "vote_cast",
            Self::LikeAdded => "poll_liked",
            Self::LikeRemoved => "poll_unliked",
            Self::Deleted => "poll_deleted",
        }
    }

    /// Every kind except deletion carries a poll snapshot.
    pub fn carries_snapshot(&self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

/// An immutable, typed change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    kind: NotificationKind,
    poll_id: PollId,
    snapshot: Option<PollSnapshot>,
}

impl Notification {
    /// An upsert carrying a full snapshot.
    ///
    /// Passing [`NotificationKind::Deleted`] is a logic error; use [`Notification::deleted`].
    pub fn upsert(kind: NotificationKind, snapshot: PollSnapshot) -> Self {
        debug_assert!(kind.carries_snapshot());
        Self {
            kind,
            poll_id: snapshot.id,
            snapshot: Some(snapshot),
        }
    }

    pub fn deleted(poll_id: PollId) -> Self {
        Self {
            kind: NotificationKind::Deleted,
            poll_id,
            snapshot: None,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn poll_id(&self) -> PollId {
        self.poll_id
    }

    pub fn snapshot(&self) -> Option<&PollSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn into_snapshot(self) -> Option<PollSnapshot> {
        self.snapshot
    }
}

/// Raw inbound envelope: `{ "type", "poll_id"?, "data"? }`.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    poll_id: Option<PollId>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Parse one UTF-8 JSON frame.
///
/// Returns `Ok(None)` for well-formed frames with an unrecognized `type`.
pub fn parse_frame(text: &str) -> Result<Option<Notification>, FrameError> {
    let frame: WireFrame = serde_json::from_str(text)?;

    let Some(kind) = NotificationKind::from_tag(&frame.tag) else {
        return Ok(None);
    };

    if !kind.carries_snapshot() {
        // Deletes may carry an empty `data` object; only the id matters.
        let poll_id = frame.poll_id.ok_or(FrameError::MissingPollId(kind.tag()))?;
        return Ok(Some(Notification::deleted(poll_id)));
    }

    let data = match frame.data {
        Some(serde_json::Value::Null) | None => {
            return Err(FrameError::MissingSnapshot(kind.tag()))
        }
        Some(data) => data,
    };
    let snapshot: PollSnapshot =
        serde_json::from_value(data).map_err(|e| FrameError::Schema(e.to_string()))?;

    Ok(Some(Notification::upsert(kind, snapshot)))
}

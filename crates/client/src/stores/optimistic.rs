//! Two-phase local changes.
//!
//! A user action is applied to the collection immediately as a tentative
//! change and later either confirmed or rolled back by the caller once the
//! HTTP round trip settles. The collection never rolls back on its own.
//!
//! Authoritative data wins: if a notification (or a fresh listing) touched
//! the poll after the tentative change, rolling back leaves the poll alone.

use quickpoll_shared::{OptionId, Poll, PollId, PollOption};

use super::polls::PollCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TentativeChange {
    Vote { option_id: OptionId },
    Like,
    Unlike,
}

/// Receipt for one tentative change; settle it with
/// [`PollCollection::confirm`] or [`PollCollection::roll_back`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "a tentative change should be confirmed or rolled back"]
pub struct TentativeTicket {
    id: u64,
    poll_id: PollId,
}

impl TentativeTicket {
    pub fn poll_id(&self) -> PollId {
        self.poll_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    RolledBack,
    /// Authoritative data arrived since; nothing was restored.
    Superseded,
    /// Already settled, or discarded by a re-initialization or delete.
    Unknown,
}

#[derive(Debug, Clone)]
pub(super) struct Pending {
    pub(super) poll_id: PollId,
    revision: u64,
    before: Prior,
}

/// The fields a tentative change may touch.
#[derive(Debug, Clone)]
struct Prior {
    options: Vec<PollOption>,
    total_votes: i64,
    total_likes: i64,
    user_liked: bool,
    user_voted_option_id: Option<OptionId>,
}

impl Prior {
    fn capture(poll: &Poll) -> Self {
        Self {
            options: poll.options.clone(),
            total_votes: poll.total_votes,
            total_likes: poll.total_likes,
            user_liked: poll.user_liked,
            user_voted_option_id: poll.user_voted_option_id,
        }
    }

    fn restore(self, poll: &mut Poll) {
        poll.options = self.options;
        poll.total_votes = self.total_votes;
        poll.total_likes = self.total_likes;
        poll.user_liked = self.user_liked;
        poll.user_voted_option_id = self.user_voted_option_id;
    }
}

impl PollCollection {
    /// Apply `change` locally.
    ///
    /// Returns `None` when the change cannot apply: unknown poll or option,
    /// already voted, like state already as requested, or another tentative
    /// change on the same poll still unsettled.
    pub fn apply_tentative(
        &mut self,
        poll_id: PollId,
        change: TentativeChange,
    ) -> Option<TentativeTicket> {
        if self.pending.values().any(|p| p.poll_id == poll_id) {
            return None;
        }
        let at = self.position(poll_id)?;
        let poll = &mut self.polls[at];
        let before = Prior::capture(poll);

        match change {
            TentativeChange::Vote { option_id } => {
                if poll.user_voted_option_id.is_some() {
                    return None;
                }
                let option = poll.options.iter_mut().find(|o| o.id == option_id)?;
                option.vote_count += 1;
                poll.total_votes += 1;
                poll.user_voted_option_id = Some(option_id);
                recompute_percentages(poll);
            }
            TentativeChange::Like => {
                if poll.user_liked {
                    return None;
                }
                poll.user_liked = true;
                poll.total_likes += 1;
            }
            TentativeChange::Unlike => {
                if !poll.user_liked {
                    return None;
                }
                poll.user_liked = false;
                poll.total_likes = (poll.total_likes - 1).max(0);
            }
        }

        self.next_ticket += 1;
        let ticket = TentativeTicket {
            id: self.next_ticket,
            poll_id,
        };
        let revision = self.revision(poll_id);
        self.pending.insert(
            ticket.id,
            Pending {
                poll_id,
                revision,
                before,
            },
        );
        Some(ticket)
    }

    /// The server accepted the change. Returns `false` if the ticket was
    /// not outstanding.
    pub fn confirm(&mut self, ticket: TentativeTicket) -> bool {
        self.pending.remove(&ticket.id).is_some()
    }

    /// The server rejected the change; restore what it replaced unless
    /// authoritative data has arrived since.
    pub fn roll_back(&mut self, ticket: TentativeTicket) -> Settlement {
        let Some(pending) = self.pending.remove(&ticket.id) else {
            return Settlement::Unknown;
        };
        if self.revision(pending.poll_id) != pending.revision {
            return Settlement::Superseded;
        }
        match self.position(pending.poll_id) {
            Some(at) => {
                pending.before.restore(&mut self.polls[at]);
                Settlement::RolledBack
            }
            None => Settlement::Unknown,
        }
    }

    pub fn has_pending(&self, poll_id: PollId) -> bool {
        self.pending.values().any(|p| p.poll_id == poll_id)
    }
}

fn recompute_percentages(poll: &mut Poll) {
    let total = poll.total_votes;
    for option in &mut poll.options {
        option.percentage = if total > 0 {
            option.vote_count * 100 / total
        } else {
            0
        };
    }
}

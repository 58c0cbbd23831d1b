//! Ordered, duplicate-free collection of polls.
//!
//! The collection is rebuilt wholesale by [`PollCollection::initialize`] and
//! patched by [`PollCollection::apply`]. It is always sorted by creation time,
//! newest first; polls created at the same instant keep their relative order.
//!
//! Status filtering is a read-time projection ([`PollCollection::project`]):
//! every notification is merged regardless of which view is displayed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use quickpoll_shared::{Notification, Poll, PollId, PollStatus};

use super::optimistic::Pending;

/// What [`PollCollection::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Inserted(PollId),
    Updated(PollId),
    Removed(PollId),
    Unchanged,
}

impl Change {
    pub fn is_change(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PollCollection {
    pub(super) polls: Vec<Poll>,
    /// Bumped whenever authoritative data touches a poll.
    pub(super) revisions: HashMap<PollId, u64>,
    pub(super) next_revision: u64,
    pub(super) pending: HashMap<u64, Pending>,
    pub(super) next_ticket: u64,
}

impl PollCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a full server listing.
    ///
    /// Duplicate ids in the listing collapse to the last occurrence, kept at
    /// the position of the first. Outstanding tentative changes are dropped:
    /// the listing is authoritative.
    pub fn initialize(&mut self, listing: Vec<Poll>) {
        let mut polls: Vec<Poll> = Vec::with_capacity(listing.len());
        let mut index: HashMap<PollId, usize> = HashMap::with_capacity(listing.len());

        for poll in listing {
            match index.get(&poll.id) {
                Some(&at) => polls[at] = poll,
                None => {
                    index.insert(poll.id, polls.len());
                    polls.push(poll);
                }
            }
        }

        self.polls = polls;
        self.pending.clear();
        self.revisions.clear();
        let ids: Vec<PollId> = self.polls.iter().map(|p| p.id).collect();
        for id in ids {
            self.touch(id);
        }
        self.sort();
    }

    /// Merge one notification.
    pub fn apply(&mut self, notification: &Notification) -> Change {
        let id = notification.poll_id();

        let Some(snapshot) = notification.snapshot() else {
            return match self.position(id) {
                Some(at) => {
                    self.polls.remove(at);
                    self.revisions.remove(&id);
                    self.pending.retain(|_, pending| pending.poll_id != id);
                    Change::Removed(id)
                }
                None => Change::Unchanged,
            };
        };

        let change = match self.position(id) {
            Some(at) => {
                self.polls[at].merge(snapshot.clone());
                Change::Updated(id)
            }
            None => {
                self.polls.insert(0, snapshot.clone().into_poll());
                Change::Inserted(id)
            }
        };
        self.touch(id);
        self.sort();
        change
    }

    pub fn get(&self, id: PollId) -> Option<&Poll> {
        self.polls.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PollId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Poll> {
        self.polls.iter()
    }

    pub fn as_slice(&self) -> &[Poll] {
        &self.polls
    }

    pub fn ids(&self) -> Vec<PollId> {
        self.polls.iter().map(|p| p.id).collect()
    }

    /// Polls matching `status` at `now`, in collection order.
    pub fn project(&self, status: PollStatus, now: DateTime<Utc>) -> Vec<&Poll> {
        self.polls
            .iter()
            .filter(|p| status.matches(p, now))
            .collect()
    }

    pub(super) fn position(&self, id: PollId) -> Option<usize> {
        self.polls.iter().position(|p| p.id == id)
    }

    pub(super) fn revision(&self, id: PollId) -> u64 {
        self.revisions.get(&id).copied().unwrap_or(0)
    }

    fn touch(&mut self, id: PollId) {
        self.next_revision += 1;
        self.revisions.insert(id, self.next_revision);
    }

    fn sort(&mut self) {
        // `sort_by` is stable; equal timestamps keep their current order.
        self.polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

impl<'a> IntoIterator for &'a PollCollection {
    type Item = &'a Poll;
    type IntoIter = std::slice::Iter<'a, Poll>;

    fn into_iter(self) -> Self::IntoIter {
        self.polls.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use quickpoll_shared::{NotificationKind, PollSnapshot};

    pub(crate) fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    pub(crate) fn poll(id: PollId, hour: u32) -> Poll {
        PollSnapshot {
            id,
            created_at: at(hour),
            title: Some(format!("Poll {id}")),
            description: None,
            is_active: None,
            user_id: Some(1),
            username: None,
            booster: None,
            expires_in: None,
            options: None,
            total_votes: None,
            total_likes: None,
            user_liked: None,
            user_voted_option_id: None,
        }
        .into_poll()
    }

    pub(crate) fn upsert(poll: Poll) -> Notification {
        Notification::upsert(NotificationKind::Updated, poll.into())
    }

    #[test]
    fn initialize_upsert_then_delete() {
        let mut polls = PollCollection::new();
        polls.initialize(vec![poll(1, 2), poll(2, 1)]);
        assert_eq!(polls.ids(), vec![1, 2]);

        assert_eq!(polls.apply(&upsert(poll(3, 3))), Change::Inserted(3));
        assert_eq!(polls.ids(), vec![3, 1, 2]);

        assert_eq!(polls.apply(&Notification::deleted(2)), Change::Removed(2));
        assert_eq!(polls.ids(), vec![3, 1]);
    }

    #[test]
    fn upsert_of_known_id_overwrites_in_place() {
        let mut polls = PollCollection::new();
        polls.initialize(vec![poll(1, 2), poll(2, 1)]);

        let mut changed = poll(2, 1);
        changed.title = "Renamed".into();
        changed.total_votes = 7;
        assert_eq!(polls.apply(&upsert(changed)), Change::Updated(2));

        assert_eq!(polls.len(), 2);
        let merged = polls.get(2).unwrap();
        assert_eq!(merged.title, "Renamed");
        assert_eq!(merged.total_votes, 7);
    }

    #[test]
    fn partial_snapshots_keep_omitted_fields() {
        let mut polls = PollCollection::new();
        let mut seeded = poll(1, 1);
        seeded.total_likes = 4;
        polls.initialize(vec![seeded]);

        let partial: PollSnapshot = serde_json::from_str(
            r#"{"id":1,"created_at":"2025-01-01T01:00:00Z","total_votes":3}"#,
        )
        .unwrap();
        polls.apply(&Notification::upsert(NotificationKind::VoteCast, partial));

        let merged = polls.get(1).unwrap();
        assert_eq!(merged.total_votes, 3);
        assert_eq!(merged.total_likes, 4);
        assert_eq!(merged.title, "Poll 1");
    }

    #[test]
    fn unknown_delete_is_a_no_op() {
        let mut polls = PollCollection::new();
        polls.initialize(vec![poll(1, 1)]);
        assert_eq!(polls.apply(&Notification::deleted(42)), Change::Unchanged);
        assert_eq!(polls.ids(), vec![1]);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let mut polls = PollCollection::new();
        let mut later = poll(1, 1);
        later.title = "Later".into();
        polls.initialize(vec![poll(1, 1), poll(2, 2), later]);

        assert_eq!(polls.ids(), vec![2, 1]);
        assert_eq!(polls.get(1).unwrap().title, "Later");

        polls.apply(&upsert(poll(2, 2)));
        polls.apply(&upsert(poll(2, 2)));
        assert_eq!(polls.len(), 2);
    }

    #[test]
    fn equal_timestamps_keep_a_stable_order() {
        let mut polls = PollCollection::new();
        polls.initialize(vec![poll(5, 1), poll(6, 1), poll(7, 1)]);
        let before = polls.ids();

        polls.apply(&upsert(poll(6, 1)));
        polls.apply(&upsert(poll(9, 0)));
        assert_eq!(polls.ids()[..3], before[..]);
    }

    #[test]
    fn arbitrary_sequences_leave_only_extant_ids() {
        let mut polls = PollCollection::new();
        let script: [(PollId, bool); 9] = [
            (1, true),
            (2, true),
            (1, true),
            (3, true),
            (2, false),
            (4, false),
            (3, true),
            (1, false),
            (2, true),
        ];
        for (id, upsert_it) in script {
            if upsert_it {
                polls.apply(&upsert(poll(id, id as u32)));
            } else {
                polls.apply(&Notification::deleted(id));
            }
        }
        assert_eq!(polls.ids(), vec![3, 2]);
    }

    #[test]
    fn projection_filters_without_dropping() {
        let mut polls = PollCollection::new();
        let mut closed = poll(1, 1);
        closed.is_active = false;
        let mut timed = poll(2, 2);
        timed.expires_in = Some(60);
        polls.initialize(vec![closed, timed, poll(3, 3)]);

        let now = at(2) + chrono::Duration::seconds(30);
        let active: Vec<PollId> = polls.project(PollStatus::Active, now).iter().map(|p| p.id).collect();
        assert_eq!(active, vec![3, 2]);

        let later = at(4);
        let expired: Vec<PollId> = polls.project(PollStatus::Expired, later).iter().map(|p| p.id).collect();
        assert_eq!(expired, vec![2, 1]);
        assert_eq!(polls.len(), 3);
    }
}

//! Local poll state.
//!
//! - [`PollCollection`]: the ordered, duplicate-free collection and its merge
//!   rules, plus two-phase tentative changes
//! - [`LivePolls`]: a collection attached to the realtime dispatcher

mod live;
mod optimistic;
mod polls;

pub use live::{LivePolls, Scope};
pub use optimistic::{Settlement, TentativeChange, TentativeTicket};
pub use polls::{Change, PollCollection};

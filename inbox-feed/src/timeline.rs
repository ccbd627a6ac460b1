//! Repairs upstream timelines into one canonical, replay-stable order.
//!
//! Delivery upstream is not causally ordered. Two inconsistencies are known and
//! fixed here before sorting: a `created` entry that looks newer than the
//! updates which followed it, and a quorum that appears to be reached after the
//! voting closed.

use crate::types::{Action, Timeline, TimelineEntry, TimelineItem};
use tracing::warn;

/// Converts raw upstream entries and returns their canonical sequence.
/// Unknown action codes are kept as [`Action::Unknown`].
pub fn reconcile(items: &[TimelineItem]) -> Timeline {
    let entries = items
        .iter()
        .map(|item| TimelineEntry::new(item.created_at, action_from_wire(&item.action)))
        .collect();

    canonicalize(entries)
}

/// Applies the creation and quorum corrections, then sorts by timestamp,
/// action weight and finally the action itself.
pub fn canonicalize(mut entries: Vec<TimelineEntry>) -> Timeline {
    let Some(earliest) = entries.iter().map(|entry| entry.created_at).min() else {
        return Timeline::default();
    };

    for entry in entries.iter_mut().filter(|entry| entry.action.is_creation()) {
        entry.created_at = earliest;
    }

    let voting_ended = entries
        .iter()
        .filter(|entry| entry.action == Action::ProposalVotingEnded)
        .map(|entry| entry.created_at)
        .max();

    if let Some(ended) = voting_ended {
        for entry in entries.iter_mut().filter(|entry| {
            entry.action == Action::ProposalVotingQuorumReached && entry.created_at > ended
        }) {
            entry.created_at = ended;
        }
    }

    entries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.action.weight().cmp(&b.action.weight()))
            .then_with(|| a.action.cmp(&b.action))
    });

    Timeline::from(entries)
}

pub(crate) fn action_from_wire(code: &str) -> Action {
    match Action::from_code(code) {
        Some(action) => action,
        None => {
            warn!(action = code, "unknown payload timeline action");
            Action::Unknown
        }
    }
}

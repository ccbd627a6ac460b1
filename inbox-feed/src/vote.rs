use crate::query::{ArchivedState, FeedQuery};
use crate::settings::SettingsManager;
use crate::store::{FeedStore, Selection, Transition};
use crate::types::Result;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument, Span};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The subscriber did not ask for archive-on-vote.
    Disabled,
    NotFound,
    Archived { id: Uuid },
}

/// Reads and archives a proposal's item once the subscriber voted on it.
pub struct VoteReactionHandler {
    store: Arc<dyn FeedStore>,
    settings: Arc<SettingsManager>,
    span: Span,
}

impl VoteReactionHandler {
    pub fn new(store: Arc<dyn FeedStore>, settings: Arc<SettingsManager>) -> Self {
        Self {
            store,
            settings,
            span: info_span!("vote_reaction"),
        }
    }

    pub async fn on_vote_cast(
        &self,
        subscriber_id: Uuid,
        proposal_id: &str,
    ) -> Result<VoteOutcome> {
        self.react(subscriber_id, proposal_id).instrument(self.span.clone()).await
    }

    async fn react(&self, subscriber_id: Uuid, proposal_id: &str) -> Result<VoteOutcome> {
        let settings = self.settings.settings(subscriber_id).await?;
        if !settings.archive_proposal_after_vote {
            return Ok(VoteOutcome::Disabled);
        }

        let query = FeedQuery::for_subscriber(subscriber_id)
            .archived_state(ArchivedState::ExcludeArchived)
            .proposal(proposal_id);
        let items = self.store.find(&query).await?;

        let Some(item) = items.first() else {
            warn!("No feed item of {} for proposal {}", subscriber_id, proposal_id);
            return Ok(VoteOutcome::NotFound);
        };
        if items.len() > 1 {
            warn!(
                "Found {} feed items of {} for proposal {}, archiving the first",
                items.len(),
                subscriber_id,
                proposal_id
            );
        }

        // Not atomic: a failure here leaves the item read but visible.
        let selection = Selection::Ids(vec![item.id]);
        self.store.transition(subscriber_id, &selection, Transition::Read).await?;
        self.store.transition(subscriber_id, &selection, Transition::Archive).await?;

        debug!("Archived item {} after vote of {}", item.id, subscriber_id);
        Ok(VoteOutcome::Archived { id: item.id })
    }
}

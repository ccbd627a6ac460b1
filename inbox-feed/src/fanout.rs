use crate::collaborators::{ContentService, ProposalSummary, PushPublisher, SubscriberDirectory};
use crate::query::FeedQuery;
use crate::snapshot::Snapshot;
use crate::store::FeedStore;
use crate::types::{Action, FeedError, FeedEvent, PushPayload, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Outcome of fanning one event out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub subscribers: usize,
    pub upserted: usize,
    pub inserted: usize,
    /// Subscribers without a row for a proposal that was already closed.
    pub skipped_closed: usize,
    pub pushed: usize,
}

/// Title and body of a push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushText {
    pub title: String,
    pub body: String,
}

impl PushText {
    /// `None` for actions that never trigger a push.
    pub fn compose(action: Action, summary: &ProposalSummary) -> Option<Self> {
        let body = match action {
            Action::ProposalCreated => format!("New proposal: {}", summary.title),
            Action::ProposalVotingQuorumReached => format!("Quorum reached: {}", summary.title),
            Action::ProposalVotingEndsSoon => format!("Voting ends soon: {}", summary.title),
            _ => return None,
        };

        Some(Self {
            title: summary.dao_name.clone(),
            body,
        })
    }

    fn for_subscriber(&self, user_id: Uuid) -> PushPayload {
        PushPayload {
            title: self.title.clone(),
            body: self.body.clone(),
            user_id,
        }
    }
}

pub struct FanoutProcessor {
    store: Arc<dyn FeedStore>,
    directory: Arc<dyn SubscriberDirectory>,
    content: Arc<dyn ContentService>,
    publisher: Arc<dyn PushPublisher>,
    span: Span,
}

impl FanoutProcessor {
    pub fn new(
        store: Arc<dyn FeedStore>,
        directory: Arc<dyn SubscriberDirectory>,
        content: Arc<dyn ContentService>,
        publisher: Arc<dyn PushPublisher>,
    ) -> Self {
        Self {
            store,
            directory,
            content,
            publisher,
            span: info_span!("fanout"),
        }
    }

    /// Materializes one event into a row per subscriber of its DAO.
    ///
    /// Subscribers are handled in directory order. The first malformed
    /// subscriber id or store failure aborts the rest of the batch; push
    /// failures never do. A subscriber is pushed only when the write moved
    /// their row to a new action, so redelivery does not push twice.
    pub async fn process(&self, event: &FeedEvent) -> Result<FanoutReport> {
        self.fan_out(event).instrument(self.span.clone()).await
    }

    async fn fan_out(&self, event: &FeedEvent) -> Result<FanoutReport> {
        let mut report = FanoutReport::default();

        if event.is_dao_level() {
            debug!("Skipping DAO-level event {} ({})", event.id, event.action);
            return Ok(report);
        }

        let subscribers = self.directory.find_subscribers(event.dao_id).await?;
        report.subscribers = subscribers.len();

        let closed = Snapshot::new(&event.snapshot).is_closed();
        let mut push_text: Option<PushText> = None;

        for raw in subscribers {
            let subscriber_id =
                Uuid::parse_str(&raw).map_err(|source| FeedError::MalformedSubscriberId {
                    raw: raw.clone(),
                    source,
                })?;

            if closed && !self.has_item(subscriber_id, event).await? {
                debug!(
                    "Proposal {} is closed, not creating an item for {}",
                    event.proposal_id, subscriber_id
                );
                report.skipped_closed += 1;
                continue;
            }

            let item = event.personalize(subscriber_id, Utc::now());
            let upserted = self.store.upsert(&item).await?;
            report.upserted += 1;
            if upserted.inserted {
                report.inserted += 1;
            }

            // A redelivered event finds the row already at its action.
            if event.action.allows_push()
                && upserted.action_changed(event.action)
                && self.push(subscriber_id, event, &mut push_text).await
            {
                report.pushed += 1;
            }
        }

        info!(
            "Event {} ({}) fanned out: {} upserted, {} new, {} pushed",
            event.id, event.action, report.upserted, report.inserted, report.pushed
        );
        Ok(report)
    }

    async fn has_item(&self, subscriber_id: Uuid, event: &FeedEvent) -> Result<bool> {
        let query = FeedQuery::for_subscriber(subscriber_id).proposal(event.proposal_id.clone());
        Ok(self.store.count(&query).await? > 0)
    }

    /// Resolves the text at most once per batch and sends one push. Returns
    /// whether the push was published.
    async fn push(
        &self,
        subscriber_id: Uuid,
        event: &FeedEvent,
        cached: &mut Option<PushText>,
    ) -> bool {
        if cached.is_none() {
            match self.content.proposal_summary(&event.proposal_id).await {
                Ok(summary) => *cached = PushText::compose(event.action, &summary),
                Err(e) => {
                    warn!("Unable to resolve push text for proposal {}: {}", event.proposal_id, e);
                    return false;
                }
            }
        }

        let Some(text) = cached.as_ref() else {
            return false;
        };

        match self.publisher.publish(&text.for_subscriber(subscriber_id)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to publish push for {}: {}", subscriber_id, e);
                false
            }
        }
    }
}

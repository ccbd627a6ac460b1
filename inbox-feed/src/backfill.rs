//! Populates a new subscriber's feed with what already happened in the DAOs
//! they just followed.

use crate::collaborators::{ContentFeedItem, ContentService, DaoFeedRequest};
use crate::config::BackfillConfig;
use crate::store::FeedStore;
use crate::timeline::{action_from_wire, reconcile};
use crate::types::{FeedError, FeedEvent, FeedKind, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub active: usize,
    pub inactive: usize,
    pub upserted: usize,
    /// Items that could not be converted or stored.
    pub failed: usize,
}

pub struct Backfiller {
    store: Arc<dyn FeedStore>,
    content: Arc<dyn ContentService>,
    config: BackfillConfig,
    span: Span,
}

impl Backfiller {
    pub fn new(
        store: Arc<dyn FeedStore>,
        content: Arc<dyn ContentService>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            store,
            content,
            config,
            span: info_span!("backfill"),
        }
    }

    pub async fn subscribe(&self, subscriber_id: Uuid, dao_id: Uuid) -> Result<BackfillReport> {
        self.subscribe_many(subscriber_id, &[dao_id]).await
    }

    /// Active items of every DAO first; finished ones only top up a feed that
    /// would otherwise stay shorter than `min_items`. Historical rows are
    /// written even for closed proposals.
    pub async fn subscribe_many(
        &self,
        subscriber_id: Uuid,
        dao_ids: &[Uuid],
    ) -> Result<BackfillReport> {
        self.backfill(subscriber_id, dao_ids).instrument(self.span.clone()).await
    }

    async fn backfill(&self, subscriber_id: Uuid, dao_ids: &[Uuid]) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        if dao_ids.is_empty() {
            return Ok(report);
        }

        let mut fetches = Fetches::default();

        let mut items: Vec<ContentFeedItem> = Vec::new();
        for batch in self.fetch(dao_ids, true, self.config.max_active, &mut fetches).await {
            items.extend(batch);
        }
        report.active = items.len();

        if items.len() < self.config.min_items {
            let inactive = self
                .fetch(dao_ids, false, self.config.max_inactive_per_dao, &mut fetches)
                .await;
            let topped_up = round_robin(inactive, self.config.min_items - items.len());
            report.inactive = topped_up.len();
            items.extend(topped_up);
        }

        if fetches.failed == fetches.attempted {
            return Err(FeedError::Content(format!(
                "every feed request failed for {} DAOs",
                dao_ids.len()
            )));
        }

        let mut events: Vec<FeedEvent> = Vec::with_capacity(items.len());
        for item in items {
            match event_from_content(item) {
                Some(event) => events.push(event),
                None => report.failed += 1,
            }
        }
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for event in &events {
            let item = event.personalize(subscriber_id, Utc::now());
            match self.store.upsert(&item).await {
                Ok(_) => report.upserted += 1,
                Err(e) => {
                    error!(
                        "Unable to save backfilled item {} for {}: {}",
                        event.id, subscriber_id, e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Backfilled {} items for {} from {} DAOs ({} active, {} inactive)",
            report.upserted,
            subscriber_id,
            dao_ids.len(),
            report.active,
            report.inactive
        );
        Ok(report)
    }

    /// One request per DAO. Failed DAOs are logged and yield no batch.
    async fn fetch(
        &self,
        dao_ids: &[Uuid],
        active: bool,
        limit: u32,
        fetches: &mut Fetches,
    ) -> Vec<Vec<ContentFeedItem>> {
        let mut batches = Vec::with_capacity(dao_ids.len());
        for &dao_id in dao_ids {
            fetches.attempted += 1;
            let request = DaoFeedRequest { dao_id, active, limit };
            match self.content.dao_feed(&request).await {
                Ok(batch) => {
                    debug!("Fetched {} items of DAO {} (active: {})", batch.len(), dao_id, active);
                    batches.push(batch);
                }
                Err(e) => {
                    warn!("Unable to fetch feed of DAO {} (active: {}): {}", dao_id, active, e);
                    fetches.failed += 1;
                }
            }
        }
        batches
    }
}

#[derive(Debug, Default)]
struct Fetches {
    attempted: usize,
    failed: usize,
}

fn event_from_content(item: ContentFeedItem) -> Option<FeedEvent> {
    let Some(kind) = FeedKind::infer(&item.kind, &item.proposal_id) else {
        warn!("Skipping backfill item {} of unknown type '{}'", item.id, item.kind);
        return None;
    };

    Some(FeedEvent {
        id: item.id,
        dao_id: item.dao_id,
        action: action_from_wire(&item.action),
        timeline: reconcile(&item.timeline),
        proposal_id: item.proposal_id,
        discussion_id: item.discussion_id,
        kind,
        snapshot: item.snapshot,
        created_at: Some(item.created_at),
    })
}

/// Takes one element from each batch in turn until `limit` elements were
/// taken or every batch is exhausted.
pub(crate) fn round_robin<T>(batches: Vec<Vec<T>>, limit: usize) -> Vec<T> {
    let mut iters: Vec<_> = batches.into_iter().map(Vec::into_iter).collect();
    let mut taken = Vec::with_capacity(limit);

    while taken.len() < limit {
        let before = taken.len();
        for iter in iters.iter_mut() {
            if taken.len() == limit {
                break;
            }
            if let Some(next) = iter.next() {
                taken.push(next);
            }
        }
        if taken.len() == before {
            break;
        }
    }

    taken
}

use super::{FeedStore, Selection, Transition, Upserted};
use crate::query::FeedQuery;
use crate::snapshot::Snapshot;
use crate::types::{FeedItem, Result, Settings};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    items: Vec<FeedItem>,
    settings: HashMap<Uuid, Settings>,
}

/// Process-local store with the same semantics as the Postgres one. Writers
/// are serialized by the state lock, which stands in for the row lock.
#[derive(Default)]
pub struct MemoryFeedStore {
    state: RwLock<MemoryState>,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row including soft-deleted ones, in insertion order.
    pub async fn items(&self) -> Vec<FeedItem> {
        self.state.read().await.items.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<FeedItem> {
        self.state.read().await.items.iter().find(|item| item.id == id).cloned()
    }

    /// Administrative soft delete. Returns false if the id is unknown.
    pub async fn soft_delete(&self, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        match state.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn upsert(&self, item: &FeedItem) -> Result<Upserted> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        // The unique key spans soft-deleted rows as well.
        if let Some(existing) = state.items.iter_mut().find(|existing| existing.same_key(item)) {
            let previous_action = existing.action;
            existing.snapshot = item.snapshot.clone();
            existing.timeline = item.timeline.clone();
            existing.action = item.action;
            existing.created_at = item.created_at;
            existing.updated_at = existing.updated_at.max(now);
            return Ok(Upserted {
                id: existing.id,
                inserted: false,
                previous_action: Some(previous_action),
            });
        }

        let mut row = item.clone();
        row.updated_at = now;
        state.items.push(row);

        Ok(Upserted {
            id: item.id,
            inserted: true,
            previous_action: None,
        })
    }

    async fn find(&self, query: &FeedQuery) -> Result<Vec<FeedItem>> {
        let state = self.state.read().await;
        Ok(query.apply(&state.items))
    }

    async fn count(&self, query: &FeedQuery) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.items.iter().filter(|item| query.matches(item)).count() as i64)
    }

    async fn transition(
        &self,
        subscriber_id: Uuid,
        selection: &Selection,
        transition: Transition,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut affected = 0;

        for item in state
            .items
            .iter_mut()
            .filter(|item| item.subscriber_id == subscriber_id && !item.is_deleted())
        {
            let selected = match selection {
                Selection::Ids(ids) => ids.contains(&item.id),
                Selection::Before(cutoff) => transition.cutoff_value(item) <= *cutoff,
            };
            if selected {
                transition.apply(item, now);
                affected += 1;
            }
        }

        Ok(affected)
    }

    async fn archive_expired(&self, default_after_days: i32) -> Result<u64> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = Utc::now();
        let mut archived = 0;

        for item in state
            .items
            .iter_mut()
            .filter(|item| !item.is_archived() && !item.is_deleted())
        {
            let Some(end) = Snapshot::new(&item.snapshot).end() else {
                continue;
            };
            let grace_days = state
                .settings
                .get(&item.subscriber_id)
                .map(|settings| settings.autoarchive_after_days)
                .unwrap_or(default_after_days);
            let grace_days = Settings::clamp_autoarchive_days(grace_days);

            let cutoff = Duration::try_days(i64::from(grace_days))
                .and_then(|grace| now.checked_sub_signed(grace));
            if cutoff.is_some_and(|cutoff| end < cutoff) {
                item.archived_at = Some(now);
                archived += 1;
            }
        }

        Ok(archived)
    }

    async fn settings(&self, subscriber_id: Uuid) -> Result<Option<Settings>> {
        Ok(self.state.read().await.settings.get(&subscriber_id).cloned())
    }

    async fn store_settings(&self, settings: &Settings) -> Result<()> {
        let mut state = self.state.write().await;
        let mut stored = settings.clone();
        if let Some(previous) = state.settings.get(&settings.subscriber_id) {
            stored.created_at = previous.created_at;
        }
        stored.updated_at = Utc::now();
        state.settings.insert(settings.subscriber_id, stored);
        Ok(())
    }
}

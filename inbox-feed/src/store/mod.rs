pub mod memory;
pub mod postgres;

pub use memory::MemoryFeedStore;
pub use postgres::PgFeedStore;

use crate::query::FeedQuery;
use crate::types::{Action, FeedItem, Result, Settings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of an upsert: the id of the row that now holds the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: Uuid,
    pub inserted: bool,
    /// Action the row carried before this write, `None` for a new row.
    pub previous_action: Option<Action>,
}

impl Upserted {
    /// False when a redelivered event rewrote the row with the action it
    /// already had.
    pub fn action_changed(&self, action: Action) -> bool {
        self.previous_action != Some(action)
    }
}

/// How a lifecycle transition addresses rows of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Ids(Vec<Uuid>),
    /// Rows whose cutoff column (see [`Transition::cutoff_column`]) is at or before the instant.
    Before(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Read,
    Unread,
    Archive,
    Unarchive,
}

impl Transition {
    /// Read state follows content updates, archive state follows item age.
    pub fn cutoff_column(&self) -> &'static str {
        match self {
            Transition::Read | Transition::Unread => "updated_at",
            Transition::Archive | Transition::Unarchive => "created_at",
        }
    }

    pub(crate) fn cutoff_value(&self, item: &FeedItem) -> DateTime<Utc> {
        match self {
            Transition::Read | Transition::Unread => item.updated_at,
            Transition::Archive | Transition::Unarchive => item.created_at,
        }
    }

    pub(crate) fn apply(&self, item: &mut FeedItem, now: DateTime<Utc>) {
        match self {
            Transition::Read => item.read_at = Some(now),
            Transition::Unread => item.read_at = None,
            Transition::Archive => item.archived_at = Some(now),
            Transition::Unarchive => {
                item.archived_at = None;
                item.unarchived_at = Some(now);
            }
        }
    }
}

/// Sole owner of feed rows and settings. Each operation is individually
/// transactional; only `upsert` takes a row lock.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Inserts or updates the row keyed by (subscriber, dao, proposal). On
    /// conflict snapshot, timeline, action and both timestamps are replaced and
    /// the row keeps its id.
    async fn upsert(&self, item: &FeedItem) -> Result<Upserted>;

    async fn find(&self, query: &FeedQuery) -> Result<Vec<FeedItem>>;

    async fn count(&self, query: &FeedQuery) -> Result<i64>;

    /// Applies a read/archive transition to the subscriber's selected live rows.
    async fn transition(
        &self,
        subscriber_id: Uuid,
        selection: &Selection,
        transition: Transition,
    ) -> Result<u64>;

    /// Archives every live, unarchived row whose proposal ended more than the
    /// subscriber's grace period ago. Returns the number of archived rows.
    async fn archive_expired(&self, default_after_days: i32) -> Result<u64>;

    async fn settings(&self, subscriber_id: Uuid) -> Result<Option<Settings>>;

    async fn store_settings(&self, settings: &Settings) -> Result<()>;
}

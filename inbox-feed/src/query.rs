//! Composable feed queries.
//!
//! A [`FeedQuery`] is a subscriber scope plus a list of named [`Filter`]
//! fragments, the fixed actuality ordering and an optional page. The same value
//! is rendered to SQL by the Postgres store and evaluated directly by the
//! in-memory store.

use crate::snapshot::{ProposalState, Snapshot, CREATED_FIELD, SPAM_FIELD, STATE_FIELD, UNRANKED};
use crate::store::FeedStore;
use crate::types::{FeedItem, Result, DEFAULT_PAGE_LIMIT};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Include,
    /// Only unread items.
    ExcludeRead,
    /// Only read items.
    ExcludeUnread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchivedState {
    #[default]
    Include,
    /// Only items that are not archived.
    ExcludeArchived,
    /// Only archived items.
    ExcludeUnarchived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Read(ReadState),
    Archived(ArchivedState),
    Proposal(String),
    ExcludeSpam,
    ExcludeCanceled,
}

impl Filter {
    pub fn matches(&self, item: &FeedItem) -> bool {
        match self {
            Filter::Read(ReadState::Include) | Filter::Archived(ArchivedState::Include) => true,
            Filter::Read(ReadState::ExcludeRead) => !item.is_read(),
            Filter::Read(ReadState::ExcludeUnread) => item.is_read(),
            Filter::Archived(ArchivedState::ExcludeArchived) => !item.is_archived(),
            Filter::Archived(ArchivedState::ExcludeUnarchived) => item.is_archived(),
            Filter::Proposal(proposal_id) => &item.proposal_id == proposal_id,
            Filter::ExcludeSpam => !Snapshot::new(&item.snapshot).is_spam(),
            Filter::ExcludeCanceled => !Snapshot::new(&item.snapshot).is_canceled(),
        }
    }

    fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Filter::Read(ReadState::Include) | Filter::Archived(ArchivedState::Include) => {}
            Filter::Read(ReadState::ExcludeRead) => {
                qb.push(" AND read_at IS NULL");
            }
            Filter::Read(ReadState::ExcludeUnread) => {
                qb.push(" AND read_at IS NOT NULL");
            }
            Filter::Archived(ArchivedState::ExcludeArchived) => {
                qb.push(" AND archived_at IS NULL");
            }
            Filter::Archived(ArchivedState::ExcludeUnarchived) => {
                qb.push(" AND archived_at IS NOT NULL");
            }
            Filter::Proposal(proposal_id) => {
                qb.push(" AND proposal_id = ").push_bind(proposal_id.clone());
            }
            Filter::ExcludeSpam => {
                qb.push(format!(
                    " AND NOT COALESCE(snapshot -> '{SPAM_FIELD}' = 'true'::jsonb, false)"
                ));
            }
            Filter::ExcludeCanceled => {
                qb.push(format!(
                    " AND COALESCE(snapshot ->> '{STATE_FIELD}', '') <> '{}'",
                    ProposalState::Canceled.as_str()
                ));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    subscriber_id: Uuid,
    filters: Vec<Filter>,
    page: Option<Page>,
}

impl FeedQuery {
    /// Every query is scoped to exactly one subscriber.
    pub fn for_subscriber(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id,
            filters: Vec::new(),
            page: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn read_state(self, state: ReadState) -> Self {
        self.filter(Filter::Read(state))
    }

    pub fn archived_state(self, state: ArchivedState) -> Self {
        self.filter(Filter::Archived(state))
    }

    pub fn proposal(self, proposal_id: impl Into<String>) -> Self {
        self.filter(Filter::Proposal(proposal_id.into()))
    }

    pub fn exclude_spam(self) -> Self {
        self.filter(Filter::ExcludeSpam)
    }

    pub fn exclude_canceled(self) -> Self {
        self.filter(Filter::ExcludeCanceled)
    }

    pub fn paginate(mut self, limit: u32, offset: u32) -> Self {
        self.page = Some(Page { limit, offset });
        self
    }

    /// Deleted rows are invisible to every query.
    pub fn matches(&self, item: &FeedItem) -> bool {
        item.subscriber_id == self.subscriber_id
            && !item.is_deleted()
            && self.filters.iter().all(|filter| filter.matches(item))
    }

    /// Actuality ordering: state rank, proposal creation time (newest first,
    /// missing last), row creation time (newest first), then id.
    pub fn compare(a: &FeedItem, b: &FeedItem) -> Ordering {
        let left = Snapshot::new(&a.snapshot);
        let right = Snapshot::new(&b.snapshot);

        left.actuality_rank()
            .cmp(&right.actuality_rank())
            .then_with(|| match (left.created(), right.created()) {
                (Some(l), Some(r)) => r.cmp(&l),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Filters, sorts and pages an in-memory collection.
    pub fn apply<'a>(&self, items: impl IntoIterator<Item = &'a FeedItem>) -> Vec<FeedItem> {
        let mut selected: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| self.matches(item))
            .cloned()
            .collect();
        selected.sort_by(Self::compare);

        match self.page {
            Some(page) => selected
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect(),
            None => selected,
        }
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE deleted_at IS NULL AND subscriber_id = ").push_bind(self.subscriber_id);
        for filter in &self.filters {
            filter.push_sql(qb);
        }
    }

    pub(crate) fn push_order(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(format!(" ORDER BY CASE snapshot ->> '{STATE_FIELD}'"));
        for state in ProposalState::ALL {
            qb.push(format!(" WHEN '{}' THEN {}", state.as_str(), state.rank()));
        }
        qb.push(format!(" ELSE {UNRANKED} END ASC"));
        qb.push(format!(
            ", CASE WHEN jsonb_typeof(snapshot -> '{CREATED_FIELD}') = 'number' \
             THEN (snapshot ->> '{CREATED_FIELD}')::double precision END DESC NULLS LAST"
        ));
        qb.push(", created_at DESC, id ASC");
    }

    pub(crate) fn push_page(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if let Some(page) = self.page {
            qb.push(" LIMIT ").push_bind(i64::from(page.limit));
            qb.push(" OFFSET ").push_bind(i64::from(page.offset));
        }
    }
}

/// A subscriber's listing request after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedRequest {
    pub subscriber_id: Uuid,
    pub read_state: ReadState,
    pub archived_state: ArchivedState,
    pub page: Page,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedListing {
    pub items: Vec<FeedItem>,
    pub total_count: i64,
    pub unread_count: i64,
}

/// Turns a listing request into the item query and its two counts.
pub struct FeedQueryEngine {
    store: Arc<dyn FeedStore>,
}

impl FeedQueryEngine {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Scope, archived and read fragments shared by the listing and both counts.
    pub fn base_query(request: &FeedRequest) -> FeedQuery {
        FeedQuery::for_subscriber(request.subscriber_id)
            .archived_state(request.archived_state)
            .read_state(request.read_state)
    }

    /// The unread subset of the listing: the base query with an unread
    /// fragment stacked on top of the requested read state. A request for
    /// read items only therefore counts zero unread.
    pub fn unread_query(request: &FeedRequest) -> FeedQuery {
        Self::base_query(request).read_state(ReadState::ExcludeRead)
    }

    pub async fn user_feed(&self, request: &FeedRequest) -> Result<FeedListing> {
        let base = Self::base_query(request);

        let total_count = self.store.count(&base).await?;
        let unread_count = self.store.count(&Self::unread_query(request)).await?;
        let items = self
            .store
            .find(&base.paginate(request.page.limit, request.page.offset))
            .await?;

        Ok(FeedListing {
            items,
            total_count,
            unread_count,
        })
    }
}

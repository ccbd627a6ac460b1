//! Request/response surface used by the RPC layer.
//!
//! Every identifier arrives as a string and is validated before any store
//! call, so a rejected request has no partial effect. Dependency failures are
//! logged here and surface as a generic [`ApiError::Internal`].

use crate::backfill::{BackfillReport, Backfiller};
use crate::query::{
    ArchivedState, FeedListing, FeedQuery, FeedQueryEngine, FeedRequest, Page, ReadState,
};
use crate::store::{FeedStore, Selection, Transition};
use crate::types::{FeedError, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info_span, warn, Instrument, Span};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("something went wrong")]
    Internal,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, Default)]
pub struct UserFeedRequest {
    pub subscriber_id: String,
    pub read_state: ReadState,
    pub archived_state: ArchivedState,
    /// Zero selects the default page size.
    pub limit: u32,
    pub offset: u32,
}

/// Addresses items either by id or by a cutoff instant. Ids win when both are set.
#[derive(Debug, Clone, Default)]
pub struct MarkRequest {
    pub subscriber_id: String,
    pub ids: Vec<String>,
    pub before: Option<DateTime<Utc>>,
}

pub struct FeedService {
    store: Arc<dyn FeedStore>,
    queries: FeedQueryEngine,
    backfiller: Arc<Backfiller>,
    span: Span,
}

impl FeedService {
    pub fn new(store: Arc<dyn FeedStore>, backfiller: Arc<Backfiller>) -> Self {
        Self {
            queries: FeedQueryEngine::new(store.clone()),
            store,
            backfiller,
            span: info_span!("feed_service"),
        }
    }

    pub async fn get_user_feed(&self, request: &UserFeedRequest) -> ApiResult<FeedListing> {
        let subscriber_id = parse_id(&request.subscriber_id, "subscriber id")?;
        let limit = match request.limit {
            0 => DEFAULT_PAGE_LIMIT,
            limit => limit.min(MAX_PAGE_LIMIT),
        };

        let feed_request = FeedRequest {
            subscriber_id,
            read_state: request.read_state,
            archived_state: request.archived_state,
            page: Page {
                limit,
                offset: request.offset,
            },
        };

        self.queries
            .user_feed(&feed_request)
            .instrument(self.span.clone())
            .await
            .map_err(|e| internal("get user feed", e))
    }

    /// A cutoff marks everything updated up to one second after it, which
    /// absorbs sub-second precision lost by clients.
    pub async fn mark_as_read(&self, request: &MarkRequest) -> ApiResult<u64> {
        let subscriber_id = parse_id(&request.subscriber_id, "subscriber id")?;
        let selection = match selection(request)? {
            Some(Selection::Before(before)) => Selection::Before(before + Duration::seconds(1)),
            Some(selection) => selection,
            None => return Ok(0),
        };

        self.apply(subscriber_id, selection, Transition::Read).await
    }

    pub async fn mark_as_unread(&self, request: &MarkRequest) -> ApiResult<u64> {
        let subscriber_id = parse_id(&request.subscriber_id, "subscriber id")?;
        let selection = match selection(request)? {
            Some(Selection::Before(before)) => Selection::Before(before - Duration::seconds(1)),
            Some(selection) => selection,
            None => return Err(ApiError::InvalidArgument("empty id list".to_string())),
        };

        self.apply(subscriber_id, selection, Transition::Unread).await
    }

    pub async fn mark_as_archived(&self, request: &MarkRequest) -> ApiResult<u64> {
        let subscriber_id = parse_id(&request.subscriber_id, "subscriber id")?;
        match selection(request)? {
            Some(selection) => self.apply(subscriber_id, selection, Transition::Archive).await,
            None => Ok(0),
        }
    }

    pub async fn mark_as_unarchived(&self, request: &MarkRequest) -> ApiResult<u64> {
        let subscriber_id = parse_id(&request.subscriber_id, "subscriber id")?;
        match selection(request)? {
            Some(selection) => self.apply(subscriber_id, selection, Transition::Unarchive).await,
            None => Err(ApiError::InvalidArgument("empty id list".to_string())),
        }
    }

    pub async fn subscribe(&self, subscriber_id: &str, dao_id: &str) -> ApiResult<BackfillReport> {
        let subscriber_id = parse_id(subscriber_id, "subscriber id")?;
        let dao_id = parse_id(dao_id, "dao id")?;

        self.backfiller
            .subscribe(subscriber_id, dao_id)
            .await
            .map_err(|e| internal("subscribe", e))
    }

    pub async fn subscribe_many(
        &self,
        subscriber_id: &str,
        dao_ids: &[String],
    ) -> ApiResult<BackfillReport> {
        let subscriber_id = parse_id(subscriber_id, "subscriber id")?;
        let dao_ids = parse_ids(dao_ids, "dao id")?;

        self.backfiller
            .subscribe_many(subscriber_id, &dao_ids)
            .await
            .map_err(|e| internal("subscribe many", e))
    }

    pub async fn has_feed(&self, subscriber_id: &str) -> ApiResult<bool> {
        let subscriber_id = parse_id(subscriber_id, "subscriber id")?;
        let query = FeedQuery::for_subscriber(subscriber_id).paginate(1, 0);

        let found = self
            .store
            .find(&query)
            .instrument(self.span.clone())
            .await
            .map_err(|e| internal("has feed", e))?;
        Ok(!found.is_empty())
    }

    async fn apply(
        &self,
        subscriber_id: Uuid,
        selection: Selection,
        transition: Transition,
    ) -> ApiResult<u64> {
        self.store
            .transition(subscriber_id, &selection, transition)
            .instrument(self.span.clone())
            .await
            .map_err(|e| internal("mark items", e))
    }
}

fn selection(request: &MarkRequest) -> ApiResult<Option<Selection>> {
    if !request.ids.is_empty() {
        return Ok(Some(Selection::Ids(parse_ids(&request.ids, "id")?)));
    }
    Ok(request.before.map(Selection::Before))
}

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidArgument(format!("invalid {what}")))
}

fn parse_ids(raw: &[String], what: &str) -> ApiResult<Vec<Uuid>> {
    raw.iter()
        .map(|id| Uuid::parse_str(id))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            warn!("Unable to convert {:?} to UUIDs: {}", raw, e);
            ApiError::InvalidArgument(format!("invalid {what} format"))
        })
}

fn internal(operation: &str, e: FeedError) -> ApiError {
    error!("Unable to {}: {}", operation, e);
    ApiError::Internal
}

use crate::types::{PushPayload, Result, TimelineItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Answers "who follows this DAO".
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Raw subscriber ids in directory order. Ids are not validated here.
    async fn find_subscribers(&self, dao_id: Uuid) -> Result<Vec<String>>;
}

/// Proposal metadata and historical feed content.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Title and DAO name used to phrase pushes.
    async fn proposal_summary(&self, proposal_id: &str) -> Result<ProposalSummary>;

    /// Most recent items of one DAO, either still active or already finished.
    async fn dao_feed(&self, request: &DaoFeedRequest) -> Result<Vec<ContentFeedItem>>;
}

/// Outbound push channel. Delivery is best effort.
#[async_trait]
pub trait PushPublisher: Send + Sync {
    async fn publish(&self, push: &PushPayload) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub title: String,
    pub dao_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoFeedRequest {
    pub dao_id: Uuid,
    pub active: bool,
    pub limit: u32,
}

/// A historical feed entry as the content service returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFeedItem {
    pub id: Uuid,
    pub dao_id: Uuid,
    #[serde(default)]
    pub proposal_id: String,
    #[serde(default)]
    pub discussion_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub snapshot: serde_json::Value,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    pub created_at: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SUBJECT_FEED_UPDATED: &str = "inbox.feed.updated";
pub const SUBJECT_VOTE_CREATED: &str = "inbox.vote.created";
pub const SUBJECT_FEED_SETTINGS_UPDATED: &str = "inbox.feed_settings.updated";
pub const SUBJECT_PUSH_CREATED: &str = "inbox.push.created";

/// One raw lifecycle entry as delivered upstream. The action code is kept as
/// a string: unknown codes are a consumer concern, not a decoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub created_at: DateTime<Utc>,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPayload {
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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotePayload {
    pub user_id: Uuid,
    pub proposal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettingsPayload {
    pub subscriber_id: Uuid,
    pub autoarchive_after_days: i32,
    /// Older producers do not send this flag; absence leaves the stored value alone.
    #[serde(default)]
    pub archive_proposal_after_vote: Option<bool>,
}

/// Outbound push request, at most one per (event, subscriber).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub user_id: Uuid,
}

/// Inbound message as it travels on the bus: a subject plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subject", content = "payload")]
pub enum Envelope {
    #[serde(rename = "inbox.feed.updated")]
    FeedUpdated(FeedPayload),
    #[serde(rename = "inbox.vote.created")]
    VoteCreated(VotePayload),
    #[serde(rename = "inbox.feed_settings.updated")]
    FeedSettingsUpdated(FeedSettingsPayload),
}

impl Envelope {
    pub fn subject(&self) -> &'static str {
        match self {
            Envelope::FeedUpdated(_) => SUBJECT_FEED_UPDATED,
            Envelope::VoteCreated(_) => SUBJECT_VOTE_CREATED,
            Envelope::FeedSettingsUpdated(_) => SUBJECT_FEED_SETTINGS_UPDATED,
        }
    }
}

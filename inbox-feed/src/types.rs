use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use interfaces::defs::{
    Envelope, FeedPayload, FeedSettingsPayload, PushPayload, TimelineItem, VotePayload,
};

pub const DEFAULT_AUTOARCHIVE_AFTER_DAYS: i32 = 7;
pub const MAX_AUTOARCHIVE_AFTER_DAYS: i32 = 3650;
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Dao,
    Proposal,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Dao => "dao",
            FeedKind::Proposal => "proposal",
        }
    }

    /// Kind of an upstream item. An unrecognized type still counts as a
    /// proposal when the item names one; otherwise it cannot be placed.
    pub fn infer(raw: &str, proposal_id: &str) -> Option<Self> {
        match raw.parse::<FeedKind>() {
            Ok(kind) => Some(kind),
            Err(_) if !proposal_id.is_empty() => Some(FeedKind::Proposal),
            Err(_) => None,
        }
    }
}

impl FromStr for FeedKind {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dao" => Ok(FeedKind::Dao),
            "proposal" => Ok(FeedKind::Proposal),
            other => Err(FeedError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle action of a DAO or proposal. Declaration order is the final
/// tie-breaker of the canonical timeline order and must not be shuffled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "dao.created")]
    DaoCreated,
    #[serde(rename = "dao.updated")]
    DaoUpdated,
    #[serde(rename = "proposal.created")]
    ProposalCreated,
    #[serde(rename = "proposal.updated")]
    ProposalUpdated,
    #[serde(rename = "proposal.voting.starts_soon")]
    ProposalVotingStartsSoon,
    #[serde(rename = "proposal.voting.started")]
    ProposalVotingStarted,
    #[serde(rename = "proposal.voting.quorum_reached")]
    ProposalVotingQuorumReached,
    #[serde(rename = "proposal.voting.ends_soon")]
    ProposalVotingEndsSoon,
    #[serde(rename = "proposal.voting.ended")]
    ProposalVotingEnded,
    #[serde(rename = "unknown")]
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn code(&self) -> &'static str {
        match self {
            Action::DaoCreated => "dao.created",
            Action::DaoUpdated => "dao.updated",
            Action::ProposalCreated => "proposal.created",
            Action::ProposalUpdated => "proposal.updated",
            Action::ProposalVotingStartsSoon => "proposal.voting.starts_soon",
            Action::ProposalVotingStarted => "proposal.voting.started",
            Action::ProposalVotingQuorumReached => "proposal.voting.quorum_reached",
            Action::ProposalVotingEndsSoon => "proposal.voting.ends_soon",
            Action::ProposalVotingEnded => "proposal.voting.ended",
            Action::Unknown => "unknown",
        }
    }

    /// Maps a wire code to an action; `None` for codes this service does not know.
    pub fn from_code(code: &str) -> Option<Self> {
        let action = match code {
            "dao.created" => Action::DaoCreated,
            "dao.updated" => Action::DaoUpdated,
            "proposal.created" => Action::ProposalCreated,
            "proposal.updated" => Action::ProposalUpdated,
            "proposal.voting.starts_soon" => Action::ProposalVotingStartsSoon,
            "proposal.voting.started" => Action::ProposalVotingStarted,
            "proposal.voting.quorum_reached" => Action::ProposalVotingQuorumReached,
            "proposal.voting.ends_soon" => Action::ProposalVotingEndsSoon,
            "proposal.voting.ended" => Action::ProposalVotingEnded,
            _ => return None,
        };
        Some(action)
    }

    /// Tie-break weight for entries sharing a timestamp.
    pub fn weight(&self) -> u8 {
        match self {
            Action::DaoCreated | Action::ProposalCreated => 1,
            Action::ProposalVotingQuorumReached => 3,
            Action::ProposalVotingEnded => 4,
            _ => 2,
        }
    }

    pub fn is_creation(&self) -> bool {
        matches!(self, Action::DaoCreated | Action::ProposalCreated)
    }

    /// Only these actions are worth interrupting a subscriber for.
    pub fn allows_push(&self) -> bool {
        matches!(
            self,
            Action::ProposalCreated
                | Action::ProposalVotingQuorumReached
                | Action::ProposalVotingEndsSoon
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub created_at: DateTime<Utc>,
    pub action: Action,
}

impl TimelineEntry {
    pub fn new(created_at: DateTime<Utc>, action: Action) -> Self {
        Self { created_at, action }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline(Vec<TimelineEntry>);

impl Timeline {
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&TimelineEntry> {
        self.0.last()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.0.iter().map(|entry| entry.action).collect()
    }
}

impl From<Vec<TimelineEntry>> for Timeline {
    fn from(entries: Vec<TimelineEntry>) -> Self {
        Self(entries)
    }
}

/// A normalized domain event about a DAO or proposal, before personalization.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub id: Uuid,
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub discussion_id: String,
    pub kind: FeedKind,
    pub action: Action,
    pub snapshot: serde_json::Value,
    pub timeline: Timeline,
    pub created_at: Option<DateTime<Utc>>,
}

impl FeedEvent {
    /// DAO-level events carry neither a proposal nor a discussion and are never fanned out.
    pub fn is_dao_level(&self) -> bool {
        self.proposal_id.is_empty() && self.discussion_id.is_empty()
    }

    /// Copies the event content into a row owned by `subscriber_id`.
    pub fn personalize(&self, subscriber_id: Uuid, now: DateTime<Utc>) -> FeedItem {
        FeedItem {
            id: Uuid::new_v4(),
            subscriber_id,
            dao_id: self.dao_id,
            proposal_id: self.proposal_id.clone(),
            discussion_id: self.discussion_id.clone(),
            kind: self.kind,
            action: self.action,
            snapshot: self.snapshot.clone(),
            timeline: self.timeline.clone(),
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
            read_at: None,
            archived_at: None,
            unarchived_at: None,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub discussion_id: String,
    pub kind: FeedKind,
    pub action: Action,
    pub snapshot: serde_json::Value,
    pub timeline: Timeline,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub unarchived_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this row occupies the same logical slot as `other`.
    pub fn same_key(&self, other: &FeedItem) -> bool {
        self.subscriber_id == other.subscriber_id
            && self.dao_id == other.dao_id
            && self.proposal_id == other.proposal_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub subscriber_id: Uuid,
    pub autoarchive_after_days: i32,
    pub archive_proposal_after_vote: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settings {
    /// The values a subscriber implicitly has before ever saving a preference.
    pub fn default_for(subscriber_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            subscriber_id,
            autoarchive_after_days: DEFAULT_AUTOARCHIVE_AFTER_DAYS,
            archive_proposal_after_vote: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Grace periods outside `0..=MAX_AUTOARCHIVE_AFTER_DAYS` would archive
    /// open proposals or overflow the sweep's date arithmetic.
    pub fn clamp_autoarchive_days(days: i32) -> i32 {
        days.clamp(0, MAX_AUTOARCHIVE_AFTER_DAYS)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed subscriber id '{raw}': {source}")]
    MalformedSubscriberId {
        raw: String,
        #[source]
        source: uuid::Error,
    },

    #[error("Unknown feed kind: {0}")]
    UnknownKind(String),

    #[error("Content service error: {0}")]
    Content(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Push publish error: {0}")]
    Publish(String),

    #[error("Consumer for {0} is not running")]
    ConsumerStopped(&'static str),
}

pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn action_codes_round_trip_through_serde() {
        let json = serde_json::to_string(&Action::ProposalVotingQuorumReached).unwrap();
        assert_eq!(json, "\"proposal.voting.quorum_reached\"");

        let unknown: Action = serde_json::from_str("\"proposal.voting.paused\"").unwrap();
        assert_eq!(unknown, Action::Unknown);
        assert_eq!(Action::from_code("proposal.voting.paused"), None);
    }

    #[test]
    fn kind_inference() {
        assert_eq!(FeedKind::infer("dao", ""), Some(FeedKind::Dao));
        assert_eq!(FeedKind::infer("proposal", "0x1"), Some(FeedKind::Proposal));
        assert_eq!(FeedKind::infer("discussion", "0x1"), Some(FeedKind::Proposal));
        assert_eq!(FeedKind::infer("discussion", ""), None);
    }

    #[test]
    fn push_eligibility() {
        assert!(Action::ProposalCreated.allows_push());
        assert!(Action::ProposalVotingQuorumReached.allows_push());
        assert!(Action::ProposalVotingEndsSoon.allows_push());
        assert!(!Action::ProposalUpdated.allows_push());
        assert!(!Action::ProposalVotingEnded.allows_push());
        assert!(!Action::Unknown.allows_push());
    }


    #[test]
    fn personalize_keeps_event_time_or_falls_back_to_now() {
        let now = Utc::now();
        let mut event = FeedEvent {
            id: Uuid::new_v4(),
            dao_id: Uuid::new_v4(),
            proposal_id: "0x1".to_string(),
            discussion_id: String::new(),
            kind: FeedKind::Proposal,
            action: Action::ProposalCreated,
            snapshot: serde_json::json!({"state": "active"}),
            timeline: Timeline::default(),
            created_at: None,
        };
        let subscriber = Uuid::new_v4();

        let item = event.personalize(subscriber, now);
        assert_eq!(item.subscriber_id, subscriber);
        assert_eq!(item.created_at, now);
        assert!(item.read_at.is_none() && item.archived_at.is_none());

        let earlier = now - Duration::hours(3);
        event.created_at = Some(earlier);
        assert_eq!(event.personalize(subscriber, now).created_at, earlier);
    }

    #[test]
    fn dao_level_detection() {
        let mut event = FeedEvent {
            id: Uuid::new_v4(),
            dao_id: Uuid::new_v4(),
            proposal_id: String::new(),
            discussion_id: String::new(),
            kind: FeedKind::Dao,
            action: Action::DaoUpdated,
            snapshot: serde_json::Value::Null,
            timeline: Timeline::default(),
            created_at: None,
        };
        assert!(event.is_dao_level());

        event.discussion_id = "d-1".to_string();
        assert!(!event.is_dao_level());
    }
}

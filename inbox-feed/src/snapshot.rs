//! Typed read access to the opaque snapshot blob.
//!
//! The snapshot is stored and forwarded untouched. The engine only ever looks
//! at the handful of fields below; the Postgres store reads the same keys in
//! SQL, so the field names are shared from here.

use chrono::{DateTime, Utc};
use serde_json::Value;

pub(crate) const STATE_FIELD: &str = "state";
pub(crate) const END_FIELD: &str = "end";
pub(crate) const CREATED_FIELD: &str = "created";
pub(crate) const SPAM_FIELD: &str = "spam";

/// Rank given to states outside the known set; sorts after every known state.
pub const UNRANKED: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    Active,
    Pending,
    Succeeded,
    Failed,
    Defeated,
    Canceled,
}

impl ProposalState {
    pub const ALL: [ProposalState; 6] = [
        ProposalState::Active,
        ProposalState::Pending,
        ProposalState::Succeeded,
        ProposalState::Failed,
        ProposalState::Defeated,
        ProposalState::Canceled,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalState::Active => "active",
            ProposalState::Pending => "pending",
            ProposalState::Succeeded => "succeeded",
            ProposalState::Failed => "failed",
            ProposalState::Defeated => "defeated",
            ProposalState::Canceled => "canceled",
        }
    }

    /// Position in the actuality ordering.
    pub fn rank(&self) -> u8 {
        match self {
            ProposalState::Active => 0,
            ProposalState::Pending => 1,
            ProposalState::Succeeded => 2,
            ProposalState::Failed => 3,
            ProposalState::Defeated => 4,
            ProposalState::Canceled => 5,
        }
    }

    /// Voting is over and the outcome is final.
    pub fn is_closed(&self) -> bool {
        !matches!(self, ProposalState::Active | ProposalState::Pending)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    raw: &'a Value,
}

impl<'a> Snapshot<'a> {
    pub fn new(raw: &'a Value) -> Self {
        Self { raw }
    }

    pub fn state(&self) -> Option<ProposalState> {
        self.raw.get(STATE_FIELD)?.as_str().and_then(ProposalState::parse)
    }

    /// Voting end time, stored upstream as unix seconds.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.timestamp(END_FIELD)
    }

    /// Proposal creation time, stored upstream as unix seconds.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.timestamp(CREATED_FIELD)
    }

    pub fn is_spam(&self) -> bool {
        matches!(self.raw.get(SPAM_FIELD), Some(Value::Bool(true)))
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == Some(ProposalState::Canceled)
    }

    /// Unknown or missing states are treated as still open.
    pub fn is_closed(&self) -> bool {
        self.state().map(|state| state.is_closed()).unwrap_or(false)
    }

    pub fn actuality_rank(&self) -> u8 {
        self.state().map(|state| state.rank()).unwrap_or(UNRANKED)
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        let seconds = self.raw.get(field)?.as_f64()?;
        DateTime::from_timestamp_millis((seconds * 1000.0) as i64)
    }
}

pub mod types;
pub mod snapshot;
pub mod timeline;
pub mod query;
pub mod store;
pub mod collaborators;
pub mod http_client;
pub mod fanout;
pub mod sweeper;
pub mod settings;
pub mod vote;
pub mod backfill;
pub mod service;
pub mod consumer;
pub mod config;
pub mod inbox;

pub use types::*;
pub use snapshot::{ProposalState, Snapshot};
pub use timeline::{canonicalize, reconcile};
pub use query::{
    ArchivedState, FeedListing, FeedQuery, FeedQueryEngine, FeedRequest, Filter, Page, ReadState,
};
pub use store::{FeedStore, MemoryFeedStore, PgFeedStore, Selection, Transition, Upserted};
pub use collaborators::{
    ContentFeedItem, ContentService, DaoFeedRequest, ProposalSummary, PushPublisher,
    SubscriberDirectory,
};
pub use http_client::{HttpClient, HttpContentService, HttpDirectory, HttpPushPublisher};
pub use fanout::{FanoutProcessor, FanoutReport, PushText};
pub use sweeper::ArchivalSweeper;
pub use settings::SettingsManager;
pub use vote::{VoteOutcome, VoteReactionHandler};
pub use backfill::{BackfillReport, Backfiller};
pub use service::{ApiError, ApiResult, FeedService, MarkRequest, UserFeedRequest};
pub use consumer::{channels, Consumer, Dispatcher, Inbound};
pub use config::{BackfillConfig, Config, HttpConfig, SweeperConfig};
pub use inbox::{InboxFeed, Running};

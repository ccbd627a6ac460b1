// Shared fakes and builders; not every test binary uses all of them.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inbox_feed::{
    Action, BackfillConfig, ContentFeedItem, ContentService, DaoFeedRequest, FeedError, FeedEvent,
    FeedKind, InboxFeed, MemoryFeedStore, ProposalSummary, PushPayload, PushPublisher, Result,
    SubscriberDirectory, SweeperConfig, Timeline, TimelineItem,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct FakeDirectory {
    subscribers: Mutex<HashMap<Uuid, Vec<String>>>,
    unavailable: AtomicBool,
}

impl FakeDirectory {
    pub fn set(&self, dao_id: Uuid, subscribers: &[Uuid]) {
        self.set_raw(dao_id, subscribers.iter().map(Uuid::to_string).collect());
    }

    pub fn set_raw(&self, dao_id: Uuid, subscribers: Vec<String>) {
        self.subscribers.lock().unwrap().insert(dao_id, subscribers);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriberDirectory for FakeDirectory {
    async fn find_subscribers(&self, dao_id: Uuid) -> Result<Vec<String>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FeedError::Directory("directory unavailable".to_string()));
        }
        Ok(self.subscribers.lock().unwrap().get(&dao_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeContent {
    summaries: Mutex<HashMap<String, ProposalSummary>>,
    summary_calls: AtomicUsize,
    summary_failures: AtomicUsize,
    feeds: Mutex<HashMap<(Uuid, bool), Vec<ContentFeedItem>>>,
    failing_daos: Mutex<HashSet<Uuid>>,
    requests: Mutex<Vec<DaoFeedRequest>>,
}

impl FakeContent {
    pub fn set_summary(&self, proposal_id: &str, title: &str, dao_name: &str) {
        self.summaries.lock().unwrap().insert(
            proposal_id.to_string(),
            ProposalSummary {
                title: title.to_string(),
                dao_name: dao_name.to_string(),
            },
        );
    }

    /// The next `count` summary lookups fail.
    pub fn fail_summaries(&self, count: usize) {
        self.summary_failures.store(count, Ordering::SeqCst);
    }

    pub fn summary_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }

    pub fn set_feed(&self, dao_id: Uuid, active: bool, items: Vec<ContentFeedItem>) {
        self.feeds.lock().unwrap().insert((dao_id, active), items);
    }

    pub fn fail_dao(&self, dao_id: Uuid) {
        self.failing_daos.lock().unwrap().insert(dao_id);
    }

    pub fn requests(&self) -> Vec<DaoFeedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentService for FakeContent {
    async fn proposal_summary(&self, proposal_id: &str) -> Result<ProposalSummary> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.summary_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.summary_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FeedError::Content("content service unavailable".to_string()));
        }

        self.summaries
            .lock()
            .unwrap()
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| FeedError::Content(format!("unknown proposal {proposal_id}")))
    }

    async fn dao_feed(&self, request: &DaoFeedRequest) -> Result<Vec<ContentFeedItem>> {
        self.requests.lock().unwrap().push(*request);

        if self.failing_daos.lock().unwrap().contains(&request.dao_id) {
            return Err(FeedError::Content(format!("feed of {} unavailable", request.dao_id)));
        }

        let mut items = self
            .feeds
            .lock()
            .unwrap()
            .get(&(request.dao_id, request.active))
            .cloned()
            .unwrap_or_default();
        items.truncate(request.limit as usize);
        Ok(items)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pushes: Mutex<Vec<PushPayload>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn pushes(&self) -> Vec<PushPayload> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushPublisher for RecordingPublisher {
    async fn publish(&self, push: &PushPayload) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::Publish("push bus unavailable".to_string()));
        }
        self.pushes.lock().unwrap().push(push.clone());
        Ok(())
    }
}

/// In-memory store plus recording fakes, wired the way the binary wires them.
pub struct Harness {
    pub store: Arc<MemoryFeedStore>,
    pub directory: Arc<FakeDirectory>,
    pub content: Arc<FakeContent>,
    pub publisher: Arc<RecordingPublisher>,
    pub inbox: InboxFeed,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backfill(BackfillConfig::default())
    }

    pub fn with_backfill(backfill: BackfillConfig) -> Self {
        init_tracing();

        let store = Arc::new(MemoryFeedStore::new());
        let directory = Arc::new(FakeDirectory::default());
        let content = Arc::new(FakeContent::default());
        let publisher = Arc::new(RecordingPublisher::default());

        let inbox = InboxFeed::new(
            store.clone(),
            directory.clone(),
            content.clone(),
            publisher.clone(),
            SweeperConfig::default(),
            backfill,
        );

        Self {
            store,
            directory,
            content,
            publisher,
            inbox,
        }
    }
}

pub fn snapshot(state: &str) -> Value {
    json!({ "state": state, "created": Utc::now().timestamp() })
}

pub fn proposal_event(dao_id: Uuid, proposal_id: &str, action: Action, state: &str) -> FeedEvent {
    FeedEvent {
        id: Uuid::new_v4(),
        dao_id,
        proposal_id: proposal_id.to_string(),
        discussion_id: String::new(),
        kind: FeedKind::Proposal,
        action,
        snapshot: snapshot(state),
        timeline: Timeline::default(),
        created_at: None,
    }
}

pub fn content_item(
    dao_id: Uuid,
    proposal_id: &str,
    state: &str,
    created_at: DateTime<Utc>,
) -> ContentFeedItem {
    ContentFeedItem {
        id: Uuid::new_v4(),
        dao_id,
        proposal_id: proposal_id.to_string(),
        discussion_id: String::new(),
        kind: "proposal".to_string(),
        action: Action::ProposalCreated.code().to_string(),
        snapshot: snapshot(state),
        timeline: vec![TimelineItem {
            created_at,
            action: Action::ProposalCreated.code().to_string(),
        }],
        created_at,
    }
}

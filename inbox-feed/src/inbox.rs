use crate::backfill::Backfiller;
use crate::collaborators::{ContentService, PushPublisher, SubscriberDirectory};
use crate::config::{BackfillConfig, SweeperConfig};
use crate::consumer::{channels, Consumer, Dispatcher};
use crate::fanout::FanoutProcessor;
use crate::service::FeedService;
use crate::settings::SettingsManager;
use crate::store::FeedStore;
use crate::sweeper::ArchivalSweeper;
use crate::vote::VoteReactionHandler;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wires every component around one store and one set of collaborators.
pub struct InboxFeed {
    store: Arc<dyn FeedStore>,
    fanout: Arc<FanoutProcessor>,
    settings: Arc<SettingsManager>,
    votes: Arc<VoteReactionHandler>,
    sweeper: Arc<ArchivalSweeper>,
    service: Arc<FeedService>,
}

/// Background tasks started by [`InboxFeed::start`].
pub struct Running {
    pub dispatcher: Dispatcher,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Cancels every loop and waits for in-flight messages to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Closes the queues and waits until every queued message was handled.
    /// The sweeper is cancelled once the consumers are done.
    pub async fn drain(self) {
        let Running {
            dispatcher,
            cancel,
            tasks,
        } = self;
        drop(dispatcher);

        let mut tasks = tasks.into_iter();
        let sweeper = tasks.next();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Consumer task failed: {}", e);
            }
        }

        cancel.cancel();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                error!("Sweeper task failed: {}", e);
            }
        }
    }

    async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!("Background task failed: {}", e);
            }
        }
    }
}

impl InboxFeed {
    pub fn new(
        store: Arc<dyn FeedStore>,
        directory: Arc<dyn SubscriberDirectory>,
        content: Arc<dyn ContentService>,
        publisher: Arc<dyn PushPublisher>,
        sweeper_config: SweeperConfig,
        backfill_config: BackfillConfig,
    ) -> Self {
        let settings = Arc::new(SettingsManager::new(store.clone()));
        let fanout = Arc::new(FanoutProcessor::new(
            store.clone(),
            directory,
            content.clone(),
            publisher,
        ));
        let votes = Arc::new(VoteReactionHandler::new(store.clone(), settings.clone()));
        let sweeper = Arc::new(ArchivalSweeper::new(store.clone(), sweeper_config));
        let backfiller = Arc::new(Backfiller::new(store.clone(), content, backfill_config));
        let service = Arc::new(FeedService::new(store.clone(), backfiller));

        Self {
            store,
            fanout,
            settings,
            votes,
            sweeper,
            service,
        }
    }

    pub fn store(&self) -> Arc<dyn FeedStore> {
        self.store.clone()
    }

    pub fn fanout(&self) -> Arc<FanoutProcessor> {
        self.fanout.clone()
    }

    pub fn settings(&self) -> Arc<SettingsManager> {
        self.settings.clone()
    }

    pub fn votes(&self) -> Arc<VoteReactionHandler> {
        self.votes.clone()
    }

    pub fn sweeper(&self) -> Arc<ArchivalSweeper> {
        self.sweeper.clone()
    }

    pub fn service(&self) -> Arc<FeedService> {
        self.service.clone()
    }

    pub fn consumer(&self) -> Consumer {
        Consumer::new(self.fanout.clone(), self.votes.clone(), self.settings.clone())
    }

    /// Spawns the sweeper and the three subject loops.
    pub fn start(&self, channel_capacity: usize) -> Running {
        let cancel = CancellationToken::new();
        let (dispatcher, inbound) = channels(channel_capacity);

        let sweeper = self.sweeper.clone();
        let sweeper_cancel = cancel.clone();
        let mut tasks = vec![tokio::spawn(async move { sweeper.run(sweeper_cancel).await })];
        tasks.extend(Arc::new(self.consumer()).spawn(inbound, cancel.clone()));

        info!("Inbox feed started");
        Running {
            dispatcher,
            cancel,
            tasks,
        }
    }
}

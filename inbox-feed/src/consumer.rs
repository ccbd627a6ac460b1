//! One sequential consumption loop per inbound subject.
//!
//! Messages of a subject are handled to completion before the next one is
//! taken; the three subjects progress independently. A handler error leaves
//! the message unacknowledged, which for the channel transport means it is
//! logged and dropped.

use crate::fanout::{FanoutProcessor, FanoutReport};
use crate::settings::SettingsManager;
use crate::timeline::{action_from_wire, reconcile};
use crate::types::{
    Envelope, FeedError, FeedEvent, FeedKind, FeedPayload, FeedSettingsPayload, Result, Settings,
    VotePayload,
};
use crate::vote::{VoteOutcome, VoteReactionHandler};
use interfaces::defs::{SUBJECT_FEED_SETTINGS_UPDATED, SUBJECT_FEED_UPDATED, SUBJECT_VOTE_CREATED};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Sending half of the subject queues.
#[derive(Clone)]
pub struct Dispatcher {
    feed: mpsc::Sender<FeedPayload>,
    votes: mpsc::Sender<VotePayload>,
    settings: mpsc::Sender<FeedSettingsPayload>,
}

impl Dispatcher {
    /// Queues an envelope on its subject, waiting while the queue is full.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let subject = envelope.subject();
        let sent = match envelope {
            Envelope::FeedUpdated(payload) => self.feed.send(payload).await.is_ok(),
            Envelope::VoteCreated(payload) => self.votes.send(payload).await.is_ok(),
            Envelope::FeedSettingsUpdated(payload) => self.settings.send(payload).await.is_ok(),
        };

        if sent {
            Ok(())
        } else {
            Err(FeedError::ConsumerStopped(subject))
        }
    }
}

/// Receiving half of the subject queues, consumed by [`Consumer::spawn`].
pub struct Inbound {
    feed: mpsc::Receiver<FeedPayload>,
    votes: mpsc::Receiver<VotePayload>,
    settings: mpsc::Receiver<FeedSettingsPayload>,
}

pub fn channels(capacity: usize) -> (Dispatcher, Inbound) {
    let (feed_tx, feed_rx) = mpsc::channel(capacity);
    let (votes_tx, votes_rx) = mpsc::channel(capacity);
    let (settings_tx, settings_rx) = mpsc::channel(capacity);

    (
        Dispatcher {
            feed: feed_tx,
            votes: votes_tx,
            settings: settings_tx,
        },
        Inbound {
            feed: feed_rx,
            votes: votes_rx,
            settings: settings_rx,
        },
    )
}

pub struct Consumer {
    fanout: Arc<FanoutProcessor>,
    votes: Arc<VoteReactionHandler>,
    settings: Arc<SettingsManager>,
    span: Span,
}

impl Consumer {
    pub fn new(
        fanout: Arc<FanoutProcessor>,
        votes: Arc<VoteReactionHandler>,
        settings: Arc<SettingsManager>,
    ) -> Self {
        Self {
            fanout,
            votes,
            settings,
            span: info_span!("consumer"),
        }
    }

    /// `Ok(None)` when the payload cannot be placed in any feed.
    pub async fn handle_feed_updated(&self, payload: FeedPayload) -> Result<Option<FanoutReport>> {
        let Some(event) = event_from_payload(payload) else {
            return Ok(None);
        };

        let report = self.fanout.process(&event).await.map_err(|e| {
            error!(parent: &self.span, "Unable to process feed item {}: {}", event.id, e);
            e
        })?;
        Ok(Some(report))
    }

    pub async fn handle_vote_created(&self, payload: VotePayload) -> Result<VoteOutcome> {
        self.votes
            .on_vote_cast(payload.user_id, &payload.proposal_id)
            .await
            .map_err(|e| {
                error!(parent: &self.span, "Unable to process vote of {}: {}", payload.user_id, e);
                e
            })
    }

    pub async fn handle_settings_updated(&self, payload: FeedSettingsPayload) -> Result<Settings> {
        self.settings
            .save_preferences(
                payload.subscriber_id,
                payload.autoarchive_after_days,
                payload.archive_proposal_after_vote,
            )
            .await
            .map_err(|e| {
                error!(
                    parent: &self.span,
                    "Unable to save settings of {}: {}", payload.subscriber_id, e
                );
                e
            })
    }

    /// Starts the three loops. Each stops when cancelled or when its queue
    /// is closed and drained.
    pub fn spawn(
        self: Arc<Self>,
        inbound: Inbound,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let Inbound { feed, votes, settings } = inbound;
        info!(parent: &self.span, "Feed consumer is started");

        let consumer = self.clone();
        let feed_loop = consume(SUBJECT_FEED_UPDATED, feed, cancel.clone(), move |payload| {
            let consumer = consumer.clone();
            async move { consumer.handle_feed_updated(payload).await.map(|_| ()) }
        });

        let consumer = self.clone();
        let vote_loop = consume(SUBJECT_VOTE_CREATED, votes, cancel.clone(), move |payload| {
            let consumer = consumer.clone();
            async move { consumer.handle_vote_created(payload).await.map(|_| ()) }
        });

        let consumer = self.clone();
        let settings_loop =
            consume(SUBJECT_FEED_SETTINGS_UPDATED, settings, cancel, move |payload| {
                let consumer = consumer.clone();
                async move { consumer.handle_settings_updated(payload).await.map(|_| ()) }
            });

        vec![
            tokio::spawn(feed_loop.instrument(self.span.clone())),
            tokio::spawn(vote_loop.instrument(self.span.clone())),
            tokio::spawn(settings_loop.instrument(self.span.clone())),
        ]
    }
}

async fn consume<T, F, Fut>(
    subject: &'static str,
    receiver: mpsc::Receiver<T>,
    cancel: CancellationToken,
    mut handle: F,
) where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let messages = ReceiverStream::new(receiver);
    tokio::pin!(messages);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = messages.next() => match next {
                Some(message) => {
                    if let Err(e) = handle(message).await {
                        warn!("Message on {} was not acknowledged: {}", subject, e);
                    }
                }
                None => break,
            },
        }
    }

    debug!("Consumer for {} stopped", subject);
}

/// Normalizes an inbound payload. The event time is the latest entry of the
/// canonical timeline; without a timeline it is left to the fanout.
pub fn event_from_payload(payload: FeedPayload) -> Option<FeedEvent> {
    let kind = match payload.kind.parse::<FeedKind>() {
        Ok(kind) => kind,
        Err(_) => match FeedKind::infer(&payload.kind, &payload.proposal_id) {
            Some(kind) => {
                warn!(
                    "Unknown payload type '{}' of {}, treating as {}",
                    payload.kind, payload.id, kind
                );
                kind
            }
            None => {
                warn!("Skipping payload {} of unknown type '{}'", payload.id, payload.kind);
                return None;
            }
        },
    };

    let timeline = reconcile(&payload.timeline);
    let created_at = timeline.last().map(|entry| entry.created_at);

    Some(FeedEvent {
        id: payload.id,
        dao_id: payload.dao_id,
        action: action_from_wire(&payload.action),
        proposal_id: payload.proposal_id,
        discussion_id: payload.discussion_id,
        kind,
        snapshot: payload.snapshot,
        timeline,
        created_at,
    })
}

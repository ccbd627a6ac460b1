use crate::config::SweeperConfig;
use crate::store::FeedStore;
use crate::types::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Periodically archives items whose proposal ended longer ago than the
/// subscriber's grace period.
pub struct ArchivalSweeper {
    store: Arc<dyn FeedStore>,
    config: SweeperConfig,
    span: Span,
}

impl ArchivalSweeper {
    pub fn new(store: Arc<dyn FeedStore>, config: SweeperConfig) -> Self {
        Self {
            store,
            config,
            span: info_span!("archival_sweeper"),
        }
    }

    /// One set-based pass. Returns the number of archived items.
    pub async fn sweep_once(&self) -> Result<u64> {
        let archived = self
            .store
            .archive_expired(self.config.default_autoarchive_after_days)
            .instrument(self.span.clone())
            .await?;

        if archived > 0 {
            info!(parent: &self.span, "Auto-archived {} feed items", archived);
        } else {
            debug!(parent: &self.span, "Nothing to auto-archive");
        }
        Ok(archived)
    }

    /// Sweeps, then waits one interval, until cancelled. A failed sweep is
    /// retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(parent: &self.span, "Archival sweeper started, interval {:?}", self.config.interval);

        while !cancel.is_cancelled() {
            if let Err(e) = self.sweep_once().await {
                error!(parent: &self.span, "Auto-archive sweep failed: {}", e);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!(parent: &self.span, "Archival sweeper stopped");
    }
}

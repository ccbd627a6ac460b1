use crate::store::FeedStore;
use crate::types::{Result, Settings};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Read-modify-upsert of per-subscriber preferences. Concurrent writers for
/// the same subscriber resolve last-write-wins.
pub struct SettingsManager {
    store: Arc<dyn FeedStore>,
    span: Span,
}

impl SettingsManager {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self {
            store,
            span: info_span!("settings"),
        }
    }

    /// Stored settings, or the defaults if the subscriber never saved any.
    pub async fn settings(&self, subscriber_id: Uuid) -> Result<Settings> {
        let stored = self
            .store
            .settings(subscriber_id)
            .instrument(self.span.clone())
            .await?;
        Ok(stored.unwrap_or_else(|| Settings::default_for(subscriber_id)))
    }

    /// Out-of-range periods are clamped, see [`Settings::clamp_autoarchive_days`].
    pub async fn save_settings(
        &self,
        subscriber_id: Uuid,
        autoarchive_after_days: i32,
    ) -> Result<Settings> {
        self.update(subscriber_id, |settings| {
            settings.autoarchive_after_days = autoarchive_after_days
        })
        .await
    }

    pub async fn save_archive_on_vote(
        &self,
        subscriber_id: Uuid,
        enabled: bool,
    ) -> Result<Settings> {
        self.update(subscriber_id, |settings| {
            settings.archive_proposal_after_vote = enabled
        })
        .await
    }

    /// Both preferences in one write; `None` keeps the stored vote flag.
    pub async fn save_preferences(
        &self,
        subscriber_id: Uuid,
        autoarchive_after_days: i32,
        archive_proposal_after_vote: Option<bool>,
    ) -> Result<Settings> {
        self.update(subscriber_id, |settings| {
            settings.autoarchive_after_days = autoarchive_after_days;
            if let Some(enabled) = archive_proposal_after_vote {
                settings.archive_proposal_after_vote = enabled;
            }
        })
        .await
    }

    async fn update<F>(&self, subscriber_id: Uuid, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) + Send,
    {
        let mut settings = self.settings(subscriber_id).await?;
        change(&mut settings);

        let requested = settings.autoarchive_after_days;
        settings.autoarchive_after_days = Settings::clamp_autoarchive_days(requested);
        if settings.autoarchive_after_days != requested {
            warn!(
                parent: &self.span,
                "Auto-archive period of {} days for {} is out of range, using {}",
                requested,
                subscriber_id,
                settings.autoarchive_after_days
            );
        }

        self.store
            .store_settings(&settings)
            .instrument(self.span.clone())
            .await?;

        debug!(parent: &self.span, "Saved feed settings of {}", subscriber_id);
        Ok(settings)
    }
}

//! JSON-over-HTTP implementations of the collaborator contracts.

use crate::collaborators::{
    ContentFeedItem, ContentService, DaoFeedRequest, ProposalSummary, PushPublisher,
    SubscriberDirectory,
};
use crate::config::HttpConfig;
use crate::types::{FeedError, PushPayload, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use interfaces::defs::SUBJECT_PUSH_CREATED;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

/// Shared client with the retry policy: transport errors and 5xx responses
/// are retried with exponential backoff, any other non-success status fails
/// immediately.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(delay * 60),
            ..Default::default()
        }
    }

    async fn send<F>(&self, url: &Url, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut backoff = self.backoff();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match build(&self.client).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let failure = FeedError::UnexpectedStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    };
                    if !status.is_server_error() {
                        return Err(failure);
                    }
                    last_error = Some(failure);
                }
                Err(e) => {
                    last_error = Some(FeedError::Http(e));
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        error!("Request to {} failed after {} attempts", url, self.config.max_retries + 1);
        Err(last_error.unwrap_or(FeedError::UnexpectedStatus {
            status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            url: url.to_string(),
        }))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let response = self.send(&url, |client| client.get(url.clone())).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn post_json<B: Serialize + Sync>(&self, url: Url, body: &B) -> Result<()> {
        debug!("POST {}", url);
        self.send(&url, |client| client.post(url.clone()).json(body)).await?;
        Ok(())
    }
}

/// Parses a service base URL so that relative endpoints resolve below it.
pub fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn endpoint(base: &Url, path: &str) -> Result<Url> {
    Ok(base.join(path)?)
}

#[derive(Debug, Deserialize)]
struct SubscriberList {
    #[serde(default)]
    users: Vec<SubscriberRef>,
}

#[derive(Debug, Deserialize)]
struct SubscriberRef {
    user_id: String,
}

pub struct HttpDirectory {
    http: HttpClient,
    base: Url,
}

impl HttpDirectory {
    pub fn new(http: HttpClient, base: Url) -> Self {
        Self { http, base }
    }
}

#[async_trait]
impl SubscriberDirectory for HttpDirectory {
    async fn find_subscribers(&self, dao_id: Uuid) -> Result<Vec<String>> {
        let mut url = endpoint(&self.base, "subscribers")?;
        url.query_pairs_mut().append_pair("dao_id", &dao_id.to_string());

        let list: SubscriberList = self.http.get_json(url).await?;
        Ok(list.users.into_iter().map(|user| user.user_id).collect())
    }
}

#[derive(Debug, Deserialize)]
struct ContentFeedPage {
    #[serde(default)]
    items: Vec<ContentFeedItem>,
}

pub struct HttpContentService {
    http: HttpClient,
    base: Url,
}

impl HttpContentService {
    pub fn new(http: HttpClient, base: Url) -> Self {
        Self { http, base }
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    async fn proposal_summary(&self, proposal_id: &str) -> Result<ProposalSummary> {
        let mut url = endpoint(&self.base, "proposals/")?;
        url.path_segments_mut()
            .map_err(|_| FeedError::Content(format!("base url {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .push(proposal_id);

        self.http.get_json(url).await
    }

    async fn dao_feed(&self, request: &DaoFeedRequest) -> Result<Vec<ContentFeedItem>> {
        let mut url = endpoint(&self.base, "feed")?;
        url.query_pairs_mut()
            .append_pair("dao_id", &request.dao_id.to_string())
            .append_pair("is_active", if request.active { "true" } else { "false" })
            .append_pair("types", "proposal")
            .append_pair("limit", &request.limit.to_string());

        let page: ContentFeedPage = self.http.get_json(url).await?;
        Ok(page.items)
    }
}

pub struct HttpPushPublisher {
    http: HttpClient,
    base: Url,
}

impl HttpPushPublisher {
    pub fn new(http: HttpClient, base: Url) -> Self {
        Self { http, base }
    }
}

#[async_trait]
impl PushPublisher for HttpPushPublisher {
    async fn publish(&self, push: &PushPayload) -> Result<()> {
        let url = endpoint(&self.base, "pushes")?;
        self.http.post_json(url, push).await?;
        debug!("Published {} for {}", SUBJECT_PUSH_CREATED, push.user_id);
        Ok(())
    }
}

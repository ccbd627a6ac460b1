use anyhow::Context;
use clap::Parser;
use inbox_feed::http_client::base_url;
use inbox_feed::{
    BackfillConfig, Config, Envelope, HttpClient, HttpContentService, HttpDirectory,
    HttpPushPublisher, InboxFeed, PgFeedStore,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    info!("Starting inbox feed");

    let store = PgFeedStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to apply migrations")?;
    info!("Connected to PostgreSQL database");

    let http = HttpClient::new(config.http()).context("Failed to create HTTP client")?;
    let directory = HttpDirectory::new(http.clone(), base_url(&config.directory_url)?);
    let content = HttpContentService::new(http.clone(), base_url(&config.content_url)?);
    let publisher = HttpPushPublisher::new(http, base_url(&config.push_url)?);

    let inbox = InboxFeed::new(
        Arc::new(store),
        Arc::new(directory),
        Arc::new(content),
        Arc::new(publisher),
        config.sweeper(),
        BackfillConfig::default(),
    );
    let running = inbox.start(config.channel_capacity);

    // Newline-delimited envelopes on stdin stand in for the message bus.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let interrupted = loop {
        tokio::select! {
            _ = &mut ctrl_c => break true,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Envelope>(line) {
                        Ok(envelope) => {
                            if let Err(e) = running.dispatcher.dispatch(envelope).await {
                                error!("Unable to dispatch message: {}", e);
                            }
                        }
                        Err(e) => warn!("Skipping malformed message: {}", e),
                    }
                }
                Ok(None) => break false,
                Err(e) => {
                    error!("Unable to read input: {}", e);
                    break false;
                }
            },
        }
    };

    if interrupted {
        info!("Interrupted, stopping");
        running.shutdown().await;
    } else {
        info!("Input closed, draining queued messages");
        running.drain().await;
    }

    info!("Inbox feed stopped");
    Ok(())
}

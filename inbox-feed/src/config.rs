use crate::types::DEFAULT_AUTOARCHIVE_AFTER_DAYS;
use clap::Parser;
use std::time::Duration;

/// Process configuration. Every flag falls back to its environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "inbox-feed", about = "Materializes per-subscriber governance feeds")]
pub struct Config {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    /// Base URL of the subscription directory.
    #[arg(long, env = "DIRECTORY_URL")]
    pub directory_url: String,

    /// Base URL of the content service.
    #[arg(long, env = "CONTENT_URL")]
    pub content_url: String,

    /// Base URL the push requests are posted to.
    #[arg(long, env = "PUSH_URL")]
    pub push_url: String,

    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    #[arg(long, env = "HTTP_MAX_RETRIES", default_value_t = 3)]
    pub http_max_retries: u32,

    #[arg(long, env = "HTTP_RETRY_DELAY_SECS", default_value_t = 1)]
    pub http_retry_delay_secs: u64,

    /// Bound of each inbound subject queue.
    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = 100)]
    pub channel_capacity: usize,
}

impl Config {
    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            ..SweeperConfig::default()
        }
    }

    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            timeout_seconds: self.http_timeout_secs,
            max_retries: self.http_max_retries,
            retry_delay_seconds: self.http_retry_delay_secs,
            ..HttpConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Grace period for subscribers that never saved settings.
    pub default_autoarchive_after_days: i32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            default_autoarchive_after_days: DEFAULT_AUTOARCHIVE_AFTER_DAYS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Active items requested per DAO.
    pub max_active: u32,
    /// Below this many active items the feed is topped up with finished ones.
    pub min_items: usize,
    pub max_inactive_per_dao: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_active: 200,
            min_items: 10,
            max_inactive_per_dao: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "inbox-feed/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 1,
        }
    }
}

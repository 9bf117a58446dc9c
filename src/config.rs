//! Configuration Module
//!
//! Runtime settings resolved from the environment, plus the API route table.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

const ENV_API_URL: &str = "NEWSDESK_API_URL";
const ENV_UPLOADS_URL: &str = "NEWSDESK_UPLOADS_URL";
const ENV_DATA_DIR: &str = "NEWSDESK_DATA_DIR";
const ENV_HTTP_TIMEOUT: &str = "NEWSDESK_HTTP_TIMEOUT_SECS";

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub uploads_url: String,
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
}

impl Config {
    /// Build configuration from `NEWSDESK_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup(ENV_API_URL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let uploads_url = lookup(ENV_UPLOADS_URL)
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{}/uploads", api_url));

        let data_dir = lookup(ENV_DATA_DIR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let http_timeout = lookup(ENV_HTTP_TIMEOUT)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Self {
            api_url,
            uploads_url,
            data_dir,
            http_timeout: Duration::from_secs(http_timeout),
        }
    }

    /// Override the API base URL. The uploads URL follows unless it was set explicitly.
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        if self.uploads_url == format!("{}/uploads", self.api_url) {
            self.uploads_url = format!("{}/uploads", api_url);
        }
        self.api_url = api_url;
        self
    }

    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Newsdesk")
}

/// Fixed API paths, relative to the base URL
pub struct ApiRoutes;

impl ApiRoutes {
    pub const LOGIN: &'static str = "/api/users/login";
    pub const REGISTER: &'static str = "/api/users/register";
    pub const VERIFY: &'static str = "/api/users/verify";
    pub const NEWS: &'static str = "/api/news";

    pub fn news_by_id(id: &str) -> String {
        format!("{}/{}", Self::NEWS, id)
    }

    pub fn publish(id: &str) -> String {
        format!("{}/{}/publish", Self::NEWS, id)
    }
}

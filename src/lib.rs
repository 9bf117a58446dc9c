//! Newsdesk Client Library
//!
//! Session lifecycle, route guarding and news API access for the
//! news-publishing platform.

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod guard;
pub mod logging;
pub mod news;
pub mod session;
pub mod storage;
pub mod token;

use tokio::sync::mpsc;

use api::{ApiClient, ApiError};
use config::Config;
use guard::{Navigator, Route};
use session::SessionStore;
use storage::{SecureStorage, StorageError};
use token::TokenStore;

/// Application state shared by every command
pub struct AppState {
    pub config: Config,
    pub api: ApiClient,
    pub session: SessionStore,
}

impl AppState {
    /// Wire up storage, the API client and a fresh session store.
    /// The receiver yields navigation requests made by the session and guard.
    pub fn new(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<Route>), InitError> {
        let storage = SecureStorage::open(config.data_dir.clone())?;
        let api = ApiClient::new(&config.api_url, config.http_timeout)?;
        let (navigator, navigation) = Navigator::channel();
        let session = SessionStore::new(api.clone(), TokenStore::new(storage), navigator);

        Ok((
            Self {
                config,
                api,
                session,
            },
            navigation,
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP client unavailable: {0}")]
    Api(#[from] ApiError),
}

//! Persisted bearer token with a fixed 7-day lifetime.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::{SecureStorage, StorageError};

pub const TOKEN_KEY: &str = "token";
pub const TOKEN_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl PersistedToken {
    /// Wrap a freshly issued token, expiring 7 days from `now`
    pub fn issued_at(value: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: now + Duration::days(TOKEN_LIFETIME_DAYS),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Reads and writes the single persisted token
#[derive(Debug, Clone)]
pub struct TokenStore {
    storage: SecureStorage,
}

impl TokenStore {
    pub fn new(storage: SecureStorage) -> Self {
        Self { storage }
    }

    /// Current usable token, if any. Expired or unreadable tokens are removed.
    pub fn load(&self) -> Option<PersistedToken> {
        match self.storage.load::<PersistedToken>(TOKEN_KEY) {
            Ok(token) if token.is_expired() => {
                info!("Persisted token expired at {}", token.expires_at);
                self.discard();
                None
            }
            Ok(token) => Some(token),
            Err(StorageError::NotFound(_)) => {
                debug!("No persisted token");
                None
            }
            Err(e) => {
                warn!("Persisted token unreadable, discarding: {}", e);
                self.discard();
                None
            }
        }
    }

    /// Persist a newly issued token
    pub fn save(&self, value: &str) -> Result<PersistedToken, StorageError> {
        let token = PersistedToken::issued_at(value, Utc::now());
        self.storage.save(TOKEN_KEY, &token)?;
        Ok(token)
    }

    pub fn remove(&self) -> Result<(), StorageError> {
        self.storage.delete(TOKEN_KEY)
    }

    pub fn exists(&self) -> bool {
        self.storage.exists(TOKEN_KEY)
    }

    fn discard(&self) {
        if let Err(e) = self.remove() {
            warn!("Failed to remove persisted token: {}", e);
        }
    }
}

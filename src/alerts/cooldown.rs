//! Expiring key-value markers that rate-limit alert notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RateLimitBackend;
use crate::persist::AlertId;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate-limit store error: {0}")]
    Backend(String),

    #[error("corrupt rate-limit entry for {0}")]
    Corrupt(String),
}

impl From<sled::Error> for RateLimitError {
    fn from(e: sled::Error) -> Self {
        RateLimitError::Backend(e.to_string())
    }
}

/// Key marking that `alert_id` fired recently.
pub fn cooldown_key(alert_id: AlertId) -> String {
    format!("alert:{alert_id}:triggered")
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// True while a live (unexpired) entry exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool, RateLimitError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RateLimitError>;
}

pub fn open(backend: &RateLimitBackend) -> Result<Arc<dyn RateLimitStore>, RateLimitError> {
    match backend {
        RateLimitBackend::Memory => Ok(Arc::new(MemoryRateLimitStore::new())),
        RateLimitBackend::Sled(path) => {
            info!(path = %path.display(), "opening sled rate-limit store");
            Ok(Arc::new(SledRateLimitStore::open(path)?))
        }
    }
}

/// Process-local store. Expiry runs on the tokio clock, so a paused test
/// runtime can move past a cooldown with `tokio::time::advance`.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn exists(&self, key: &str) -> Result<bool, RateLimitError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires)) if *expires > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}

/// On-disk store; entries survive restarts. Each value is the wall-clock
/// expiry in epoch millis (big endian) followed by the raw value bytes.
/// sled calls block, so they run on the blocking pool. Expired entries are
/// dropped when read and purged on every write.
pub struct SledRateLimitStore {
    db: sled::Db,
}

impl SledRateLimitStore {
    pub fn open(path: &std::path::Path) -> Result<Self, RateLimitError> {
        Ok(Self { db: sled::open(path)? })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RateLimitError>
    where
        T: Send + 'static,
        F: FnOnce(sled::Db) -> Result<T, RateLimitError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?
    }
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn expiry_of(raw: &[u8]) -> Option<u64> {
    raw.get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
}

/// Remove every entry whose expiry has passed, or that has no readable expiry.
fn purge_expired(db: &sled::Db, now_millis: u64) -> Result<usize, RateLimitError> {
    let mut purged = 0;
    for entry in db.iter() {
        let (key, raw) = entry?;
        if expiry_of(&raw).map_or(true, |expires| expires <= now_millis) {
            db.remove(key)?;
            purged += 1;
        }
    }
    Ok(purged)
}

#[async_trait]
impl RateLimitStore for SledRateLimitStore {
    async fn exists(&self, key: &str) -> Result<bool, RateLimitError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let Some(raw) = db.get(key.as_bytes())? else {
                return Ok(false);
            };
            let expires = expiry_of(&raw).ok_or_else(|| RateLimitError::Corrupt(key.clone()))?;
            if expires > epoch_millis(SystemTime::now()) {
                Ok(true)
            } else {
                db.remove(key.as_bytes())?;
                Ok(false)
            }
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RateLimitError> {
        let now = SystemTime::now();
        let mut raw = Vec::with_capacity(8 + value.len());
        raw.extend_from_slice(&epoch_millis(now + ttl).to_be_bytes());
        raw.extend_from_slice(value.as_bytes());
        let key = key.to_string();

        self.blocking(move |db| {
            let purged = purge_expired(&db, epoch_millis(now))?;
            if purged > 0 {
                debug!(purged, "purged expired cooldown entries");
            }
            db.insert(key.as_bytes(), raw)?;
            Ok(())
        })
        .await?;
        self.db.flush_async().await?;
        Ok(())
    }
}

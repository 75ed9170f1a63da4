//! Narrow interfaces to the chat platform and cloud services the commands
//! rely on. Concrete adapters live in the bot crate.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::{dates, reply::Reply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub channel: String,
    pub thread_ts: String,
    pub filename: String,
    pub comment: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn list_channel_members(&self, channel: &str) -> Result<Vec<String>>;

    /// Splits user ids into `(humans, bots)`, keeping the input order.
    async fn classify_users(&self, ids: &[String]) -> Result<(Vec<String>, Vec<String>)>;

    async fn post_message(&self, channel: &str, reply: &Reply) -> Result<PostedMessage>;

    async fn upload_file(&self, upload: FileUpload) -> Result<()>;

    async fn download_file(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Returns the dominant language code of `text`.
    async fn detect_language(&self, text: &str) -> Result<String>;

    async fn translate_text(&self, text: &str, source: &str, target: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub location: String,
    pub key: String,
    /// When the store will drop the object, if it expires at all.
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<StoredObject>;

    async fn presign_get(&self, key: &str, valid_for: Duration) -> Result<PresignedUrl>;
}

/// A keyed record with an absolute expiry, persisted as
/// `{ID, URL?, TTL, Time}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableItem {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Expiry as unix epoch seconds.
    #[serde(rename = "TTL")]
    pub ttl: i64,
    #[serde(rename = "Time", with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

impl TableItem {
    /// Fails when `now + lifetime` is past the representable range.
    pub fn new(id: impl Into<String>, now: OffsetDateTime, lifetime: Duration) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            url: None,
            ttl: dates::expiry_after(now, lifetime)?.unix_timestamp(),
            time: now,
        })
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.ttl > now.unix_timestamp()
    }

    pub fn expires_at(&self) -> Result<OffsetDateTime> {
        Ok(OffsetDateTime::from_unix_timestamp(self.ttl)?)
    }
}

/// A key-value table with expiring items. Expired items read as absent.
#[async_trait]
pub trait RecordTable: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<Option<TableItem>>;

    async fn put_record(&self, item: TableItem) -> Result<()>;

    /// Stores `item` unless a live item with the same id exists. Returns
    /// whether the item was stored. The check and the write are atomic.
    async fn put_if_absent(&self, item: TableItem) -> Result<bool>;
}

/// In-process table; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTable {
    items: Mutex<HashMap<String, TableItem>>,
}

impl MemoryTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordTable for MemoryTable {
    async fn get_record(&self, id: &str) -> Result<Option<TableItem>> {
        let now = OffsetDateTime::now_utc();
        let items = self.items.lock().await;
        Ok(items.get(id).filter(|item| item.is_live(now)).cloned())
    }

    async fn put_record(&self, item: TableItem) -> Result<()> {
        self.items.lock().await.insert(item.id.clone(), item);
        Ok(())
    }

    async fn put_if_absent(&self, item: TableItem) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut items = self.items.lock().await;
        if items.get(&item.id).is_some_and(|existing| existing.is_live(now)) {
            return Ok(false);
        }
        items.insert(item.id.clone(), item);
        Ok(true)
    }
}

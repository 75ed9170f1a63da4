//! Mock collaborators for plugin and dispatcher tests.
//!
//! ```toml
//! [dev-dependencies]
//! plugin-test = { path = "../plugin-test" }
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use time::{Duration, OffsetDateTime, UtcOffset};

use plugin_core::{
    PluginContext, PluginRegistry, dates,
    reply::Reply,
    services::{
        ChatPlatform, FileUpload, MemoryTable, ObjectStore, PostedMessage, PresignedUrl,
        StoredObject, Translator,
    },
};

/// Chat platform that records everything sent to it.
#[derive(Debug, Default)]
pub struct MockChat {
    members: Vec<String>,
    bots: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    fail_posts: AtomicBool,
    posted: Mutex<Vec<(String, Reply)>>,
    uploads: Mutex<Vec<FileUpload>>,
    member_lookups: AtomicUsize,
}

impl MockChat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_members(mut self, ids: &[&str]) -> Self {
        self.members = ids.iter().map(|id| (*id).to_owned()).collect();
        self
    }

    /// Marks ids as bots; they must also be members to be listed.
    #[must_use]
    pub fn with_bots(mut self, ids: &[&str]) -> Self {
        self.bots = ids.iter().map(|id| (*id).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn with_file(mut self, url: &str, body: &[u8]) -> Self {
        self.files.insert(url.to_owned(), body.to_vec());
        self
    }

    /// Makes every `post_message` call fail.
    #[must_use]
    pub fn failing_posts(self) -> Self {
        self.fail_posts.store(true, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn posted(&self) -> Vec<(String, Reply)> {
        self.posted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn uploads(&self) -> Vec<FileUpload> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn member_lookups(&self) -> usize {
        self.member_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatPlatform for MockChat {
    async fn list_channel_members(&self, _channel: &str) -> Result<Vec<String>> {
        self.member_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.members.clone())
    }

    async fn classify_users(&self, ids: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        Ok(ids.iter().cloned().partition(|id| !self.bots.contains(id)))
    }

    async fn post_message(&self, channel: &str, reply: &Reply) -> Result<PostedMessage> {
        if self.fail_posts.load(Ordering::SeqCst) {
            bail!("channel_not_found");
        }
        let mut posted = self.posted.lock().map_err(|_| anyhow!("poisoned"))?;
        posted.push((channel.to_owned(), reply.clone()));
        Ok(PostedMessage {
            channel: channel.to_owned(),
            ts: format!("1600128000.{:06}", posted.len()),
        })
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<()> {
        self.uploads
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(upload);
        Ok(())
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("file not found: {url}"))
    }
}

/// Translator that tags text with the target language.
#[derive(Debug)]
pub struct MockTranslator {
    detected: String,
    fail: bool,
}

impl MockTranslator {
    #[must_use]
    pub fn detecting(language: &str) -> Self {
        Self {
            detected: language.to_owned(),
            fail: false,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            detected: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn detect_language(&self, _text: &str) -> Result<String> {
        if self.fail {
            bail!("detection unavailable");
        }
        Ok(self.detected.clone())
    }

    async fn translate_text(&self, text: &str, _source: &str, target: &str) -> Result<String> {
        Ok(format!("[{target}] {text}"))
    }
}

/// Object store keeping bodies in memory.
#[derive(Debug, Default)]
pub struct MockObjects {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockObjects {
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.lock().map_or(true, |o| o.is_empty())
    }
}

#[async_trait]
impl ObjectStore for MockObjects {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<StoredObject> {
        self.objects
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .insert(key.to_owned(), body);
        Ok(StoredObject {
            location: "memory".to_owned(),
            key: key.to_owned(),
            expires_at: None,
        })
    }

    async fn presign_get(&self, key: &str, valid_for: Duration) -> Result<PresignedUrl> {
        let expires_at = dates::expiry_after(OffsetDateTime::now_utc(), valid_for)?;
        Ok(PresignedUrl {
            url: format!(
                "https://objects.test/{key}?expires={}",
                expires_at.unix_timestamp()
            ),
            expires_at,
        })
    }
}

/// A context backed by `chat` and default mocks for everything else.
#[must_use]
pub fn test_context(chat: Arc<MockChat>) -> PluginContext {
    PluginContext {
        chat,
        translator: Arc::new(MockTranslator::detecting("en")),
        objects: Arc::new(MockObjects::default()),
        urls: Arc::new(MemoryTable::new()),
        registry: Arc::new(PluginRegistry::new()),
        public_base_url: Arc::from("https://s.test/"),
        display_offset: UtcOffset::UTC,
    }
}

//! File-backed record tables and object store.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use hmac::{Hmac, Mac as _};
use reqwest::Url;
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::debug;

use plugin_core::{
    dates,
    services::{ObjectStore, PresignedUrl, RecordTable, StoredObject, TableItem},
};

/// A [`RecordTable`] persisted as a JSON array in one file.
///
/// Every write rewrites the file through a temporary sibling and a rename,
/// dropping expired items on the way.
#[derive(Debug)]
pub struct FileTable {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, TableItem>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }
        let items: Vec<TableItem> = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(items.into_iter().map(|i| (i.id.clone(), i)).collect())
    }

    async fn store(&self, items: BTreeMap<String, TableItem>) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let live: Vec<&TableItem> = items.values().filter(|i| i.is_live(now)).collect();
        let dropped = items.len() - live.len();
        if dropped > 0 {
            debug!(file = %self.path.display(), dropped, "Dropped expired records");
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let body = serde_json::to_vec_pretty(&live).context("encoding records")?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))
    }
}

#[async_trait]
impl RecordTable for FileTable {
    async fn get_record(&self, id: &str) -> Result<Option<TableItem>> {
        let _guard = self.lock.lock().await;
        let now = OffsetDateTime::now_utc();
        Ok(self.load().await?.remove(id).filter(|i| i.is_live(now)))
    }

    async fn put_record(&self, item: TableItem) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        items.insert(item.id.clone(), item);
        self.store(items).await
    }

    async fn put_if_absent(&self, item: TableItem) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let now = OffsetDateTime::now_utc();
        let mut items = self.load().await?;
        if items.get(&item.id).is_some_and(|i| i.is_live(now)) {
            return Ok(false);
        }
        items.insert(item.id.clone(), item);
        self.store(items).await?;
        Ok(true)
    }
}

/// Keeps objects as files under `root` and hands out links to the
/// `/objects/...` route of this service. Links carry
/// `sig = HMAC-SHA256(key|expires)` in hex.
#[derive(Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base: Url,
    retention: Duration,
    signing_key: Vec<u8>,
}

impl core::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("root", &self.root)
            .field("public_base", &self.public_base.as_str())
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl FsObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base: &str,
        retention: Duration,
        signing_key: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let public_base = Url::parse(public_base)
            .with_context(|| format!("invalid public base URL {public_base}"))?;
        if public_base.cannot_be_a_base() {
            bail!("public base URL {public_base} cannot carry a path");
        }
        Ok(Self {
            root: root.into(),
            public_base,
            retention,
            signing_key: signing_key.into(),
        })
    }

    fn link_mac(&self, key: &str, expires: i64) -> Result<Hmac<Sha256>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.signing_key)
            .context("initializing link signer")?;
        mac.update(key.as_bytes());
        mac.update(b"|");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    pub fn sign_link(&self, key: &str, expires: i64) -> Result<String> {
        Ok(hex::encode(self.link_mac(key, expires)?.finalize().into_bytes()))
    }

    /// Checks a link signature in constant time.
    pub fn verify_link(&self, key: &str, expires: i64, signature: &str) -> Result<()> {
        let signature = hex::decode(signature.trim()).context("malformed link signature")?;
        self.link_mac(key, expires)?
            .verify_slice(&signature)
            .map_err(|_| anyhow!("link signature verification failed"))
    }

    /// Maps an object key to its file, refusing anything that could leave
    /// the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("invalid object key {key:?}");
        }
        Ok(self.root.join(rel))
    }

    /// The object body while it is within the retention period.
    pub async fn read_live(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("inspecting {}", path.display())),
        };
        let written = OffsetDateTime::from(meta.modified()?);
        if written
            .checked_add(self.retention)
            .is_some_and(|until| until <= OffsetDateTime::now_utc())
        {
            debug!(key, "Object past retention");
            return Ok(None);
        }
        let body = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(key, path = %path.display(), "Stored object");
        Ok(StoredObject {
            location: path.display().to_string(),
            key: key.to_owned(),
            expires_at: OffsetDateTime::now_utc().checked_add(self.retention),
        })
    }

    async fn presign_get(&self, key: &str, valid_for: Duration) -> Result<PresignedUrl> {
        self.path_for(key)?;
        let expires_at = dates::expiry_after(OffsetDateTime::now_utc(), valid_for)?;
        let mut url = self.public_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| anyhow!("public base URL cannot carry a path"))?;
            segments.pop_if_empty().push("objects");
            for part in key.split('/') {
                segments.push(part);
            }
        }
        let expires = expires_at.unix_timestamp();
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("sig", &self.sign_link(key, expires)?);
        Ok(PresignedUrl {
            url: url.into(),
            expires_at,
        })
    }
}

//! Repository backend.
//!
//! Records live in memory; with a data directory configured, every write
//! is also mirrored to a sharded JSON document (`ab/cd/<id>.json`) and the
//! whole tree is reloaded at startup. Queries scan the in-memory map,
//! which is fine at the scale one control plane handles.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use webtrawl_core::normalize::url_variants;
use webtrawl_core::record::{FetchRecord, NewFetchRecord, RecordFilter, RecordPatch};
use webtrawl_core::{Error, Repository, Result, ScrapeStatus};

pub struct RecordStore {
    inner: RwLock<HashMap<String, FetchRecord>>,
    dir: Option<PathBuf>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Open (or create) a persistent store rooted at `dir`.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| Error::Store(e.to_string()))?;
        let mut map = HashMap::new();
        for rec in load_records(&dir)? {
            map.insert(rec.id.clone(), rec);
        }
        Ok(Self {
            inner: RwLock::new(map),
            dir: Some(dir),
        })
    }

    fn new_id() -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(24);
        id
    }

    async fn persist(&self, rec: &FetchRecord) -> Result<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        let rec = rec.clone();
        tokio::task::spawn_blocking(move || write_record(&dir, &rec))
            .await
            .map_err(|e| Error::Store(format!("persist join failed: {e}")))?
    }
}

fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(&id[0..2]).join(&id[2..4]).join(format!("{id}.json"))
}

fn write_record(dir: &Path, rec: &FetchRecord) -> Result<()> {
    let path = record_path(dir, &rec.id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::Store(e.to_string()))?;
    }
    let bytes = serde_json::to_vec(rec).map_err(|e| Error::Store(e.to_string()))?;
    fs::write(&path, bytes).map_err(|e| Error::Store(e.to_string()))
}

fn load_records(dir: &Path) -> Result<Vec<FetchRecord>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let rd = match fs::read_dir(&d) {
            Ok(rd) => rd,
            Err(e) => return Err(Error::Store(e.to_string())),
        };
        for entry in rd.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some("json") {
                let bytes = fs::read(&path).map_err(|e| Error::Store(e.to_string()))?;
                match serde_json::from_slice::<FetchRecord>(&bytes) {
                    Ok(rec) => out.push(rec),
                    // A corrupt document should not take the store down.
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record"),
                }
            }
        }
    }
    Ok(out)
}

fn matches_direct(rec: &FetchRecord, variants: &[String]) -> bool {
    variants.iter().any(|v| *v == rec.url)
}

fn matches_chain(rec: &FetchRecord, variants: &[String]) -> bool {
    rec.redirect_chain
        .iter()
        .any(|u| variants.iter().any(|v| v == u))
}

#[async_trait::async_trait]
impl Repository for RecordStore {
    async fn create(&self, new: NewFetchRecord) -> Result<FetchRecord> {
        let now = Utc::now();
        let rec = FetchRecord {
            id: Self::new_id(),
            url: new.url,
            status: new.status,
            content: None,
            content_type: None,
            http_status: None,
            error_message: None,
            final_url: None,
            redirect_chain: Vec::new(),
            content_hash: None,
            content_length: None,
            response_time: None,
            user_agent: None,
            retry_count: new.retry_count,
            fetched_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .await
            .insert(rec.id.clone(), rec.clone());
        self.persist(&rec).await?;
        Ok(rec)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<FetchRecord>> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<FetchRecord>> {
        let variants = url_variants(url);
        let map = self.inner.read().await;
        Ok(map
            .values()
            .filter(|r| matches_direct(r, &variants))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_latest_success_by_url(&self, url: &str) -> Result<Option<FetchRecord>> {
        let variants = url_variants(url);
        let map = self.inner.read().await;
        Ok(map
            .values()
            .filter(|r| r.status == ScrapeStatus::Success && matches_direct(r, &variants))
            .max_by_key(|r| r.fetched_at.unwrap_or(r.created_at))
            .cloned())
    }

    async fn find_all(
        &self,
        filter: RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FetchRecord>> {
        let map = self.inner.read().await;
        let mut records: Vec<FetchRecord> = map
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, id: &str, patch: RecordPatch) -> Result<FetchRecord> {
        let rec = {
            let mut map = self.inner.write().await;
            let rec = map
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("record {id}")))?;
            patch.apply(rec);
            rec.clone()
        };
        self.persist(&rec).await?;
        Ok(rec)
    }

    async fn get_recent_by_url(
        &self,
        url: &str,
        window: Duration,
    ) -> Result<Option<FetchRecord>> {
        let variants = url_variants(url);
        let cutoff = Utc::now() - window;
        let map = self.inner.read().await;

        let direct = map
            .values()
            .filter(|r| matches_direct(r, &variants))
            .filter(|r| match r.status {
                ScrapeStatus::Success => r.fetched_at.map_or(false, |t| t >= cutoff),
                s if s.is_active() => r.created_at >= cutoff,
                _ => false,
            })
            .max_by_key(|r| r.fetched_at.unwrap_or(r.created_at));
        if let Some(rec) = direct {
            return Ok(Some(rec.clone()));
        }

        let via_chain = map
            .values()
            .filter(|r| {
                r.status == ScrapeStatus::Success
                    && r.fetched_at.map_or(false, |t| t >= cutoff)
                    && matches_chain(r, &variants)
            })
            .max_by_key(|r| r.fetched_at.unwrap_or(r.created_at));
        Ok(via_chain.cloned())
    }

    async fn find_stale_pending(&self, timeout: Duration) -> Result<Vec<FetchRecord>> {
        let cutoff = Utc::now() - timeout;
        let map = self.inner.read().await;
        Ok(map
            .values()
            .filter(|r| r.status == ScrapeStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn history(&self, url: &str) -> Result<Vec<FetchRecord>> {
        let variants = url_variants(url);
        let map = self.inner.read().await;
        let mut records: Vec<FetchRecord> = map
            .values()
            .filter(|r| matches_direct(r, &variants))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.fetched_at
                .cmp(&a.fetched_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(records)
    }
}

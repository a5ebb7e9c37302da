//! The persistence seam.
//!
//! The pipeline never talks to a concrete document store; it talks to this
//! trait. `*_by_url` lookups match against the whole variant set from
//! [`crate::normalize::url_variants`] so rows written before normalization
//! keep resolving; new rows always store canonical URLs.

use crate::record::{FetchRecord, NewFetchRecord, RecordFilter, RecordPatch};
use crate::Result;
use chrono::Duration;

#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    /// Create a record with a server-generated id and timestamps.
    async fn create(&self, new: NewFetchRecord) -> Result<FetchRecord>;

    async fn find_by_id(&self, id: &str) -> Result<Option<FetchRecord>>;

    /// Most recently created record matching any URL variant.
    async fn find_by_url(&self, url: &str) -> Result<Option<FetchRecord>>;

    /// Most recently fetched SUCCESS record matching any URL variant.
    async fn find_latest_success_by_url(&self, url: &str) -> Result<Option<FetchRecord>>;

    /// All records, newest first by creation time.
    async fn find_all(
        &self,
        filter: RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FetchRecord>>;

    /// Partial update; `Patch::Clear` fields are erased, `Patch::Keep`
    /// fields untouched. Errors with `Error::NotFound` on a missing id.
    async fn update(&self, id: &str, patch: RecordPatch) -> Result<FetchRecord>;

    /// The dedup query. Returns a record iff, within the window, any of:
    /// a direct-match SUCCESS (by `fetched_at`), a direct-match active
    /// record (by `created_at`), or a SUCCESS whose redirect chain contains
    /// the URL. Direct matches win over chain matches.
    async fn get_recent_by_url(&self, url: &str, window: Duration)
        -> Result<Option<FetchRecord>>;

    /// PENDING records older than the timeout, for the stale sweep.
    async fn find_stale_pending(&self, timeout: Duration) -> Result<Vec<FetchRecord>>;

    /// Every record for a URL, most recently fetched first.
    async fn history(&self, url: &str) -> Result<Vec<FetchRecord>>;
}

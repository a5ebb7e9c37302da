use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one fetch record. `Archived` is reserved (readable from
/// legacy rows, never produced by any transition here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapeStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Archived,
}

impl ScrapeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScrapeStatus::Success | ScrapeStatus::Failed)
    }

    /// Active records are the ones the dedup window counts as "in flight".
    pub fn is_active(self) -> bool {
        matches!(self, ScrapeStatus::Pending | ScrapeStatus::Processing)
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScrapeStatus::Pending => "PENDING",
            ScrapeStatus::Processing => "PROCESSING",
            ScrapeStatus::Success => "SUCCESS",
            ScrapeStatus::Failed => "FAILED",
            ScrapeStatus::Archived => "ARCHIVED",
        };
        f.write_str(s)
    }
}

/// One row per submission-attempt-chain; retries reuse the same record.
///
/// `url` and every entry of `redirect_chain` are stored in canonical form
/// (see [`crate::normalize::canonical`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRecord {
    pub id: String,
    pub url: String,
    pub status: ScrapeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default)]
    pub redirect_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the caller supplies at creation; the store fills in id and
/// timestamps.
#[derive(Debug, Clone)]
pub struct NewFetchRecord {
    pub url: String,
    pub status: ScrapeStatus,
    pub retry_count: u32,
}

/// Record ids are 24 lowercase hex chars.
pub fn is_valid_id(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Three-way update sentinel. Updates are last-write-wins on the full
/// patch payload, so a patch must distinguish "leave alone" from "clear".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

// Manual impl: the derive would demand `T: Default`, which timestamp
// payloads do not have.
impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = None,
            Patch::Set(v) => *slot = Some(v),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets, `None` keeps. Clearing is always explicit.
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Patch::Set(v),
            None => Patch::Keep,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<ScrapeStatus>,
    pub content: Patch<String>,
    pub content_type: Patch<String>,
    pub http_status: Patch<u16>,
    pub error_message: Patch<String>,
    pub final_url: Patch<String>,
    pub redirect_chain: Option<Vec<String>>,
    pub content_hash: Patch<String>,
    pub content_length: Patch<u64>,
    pub response_time: Patch<u64>,
    pub user_agent: Patch<String>,
    pub retry_count: Option<u32>,
    pub fetched_at: Patch<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn apply(self, rec: &mut FetchRecord) {
        if let Some(status) = self.status {
            rec.status = status;
        }
        self.content.apply(&mut rec.content);
        self.content_type.apply(&mut rec.content_type);
        self.http_status.apply(&mut rec.http_status);
        self.error_message.apply(&mut rec.error_message);
        self.final_url.apply(&mut rec.final_url);
        if let Some(chain) = self.redirect_chain {
            rec.redirect_chain = chain;
        }
        self.content_hash.apply(&mut rec.content_hash);
        self.content_length.apply(&mut rec.content_length);
        self.response_time.apply(&mut rec.response_time);
        self.user_agent.apply(&mut rec.user_agent);
        if let Some(n) = self.retry_count {
            rec.retry_count = n;
        }
        self.fetched_at.apply(&mut rec.fetched_at);
        rec.updated_at = Utc::now();
    }
}

/// Filter for listing queries. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<ScrapeStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FetchRecord {
        FetchRecord {
            id: "0123456789abcdef01234567".to_string(),
            url: "https://example.com".to_string(),
            status: ScrapeStatus::Pending,
            content: None,
            content_type: None,
            http_status: None,
            error_message: Some("Retry 1/3: Connection refused".to_string()),
            final_url: None,
            redirect_chain: Vec::new(),
            content_hash: None,
            content_length: None,
            response_time: None,
            user_agent: None,
            retry_count: 1,
            fetched_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn patch_distinguishes_keep_from_clear() {
        let mut rec = record();

        RecordPatch {
            status: Some(ScrapeStatus::Processing),
            ..Default::default()
        }
        .apply(&mut rec);
        assert_eq!(rec.status, ScrapeStatus::Processing);
        assert!(rec.error_message.is_some(), "Keep must not clear");

        RecordPatch {
            error_message: Patch::Clear,
            ..Default::default()
        }
        .apply(&mut rec);
        assert!(rec.error_message.is_none());
    }

    #[test]
    fn patch_from_option_never_clears() {
        let mut slot = Some("kept".to_string());
        Patch::from(None::<String>).apply(&mut slot);
        assert_eq!(slot.as_deref(), Some("kept"));
        Patch::from(Some("new".to_string())).apply(&mut slot);
        assert_eq!(slot.as_deref(), Some("new"));
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&ScrapeStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let back: ScrapeStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(back, ScrapeStatus::Failed);
    }

    #[test]
    fn record_roundtrips_camel_case() {
        let rec = record();
        let v = serde_json::to_value(&rec).unwrap();
        assert!(v.get("retryCount").is_some());
        assert!(v.get("errorMessage").is_some());
        assert!(v.get("content").is_none(), "None fields are omitted");
        let back: FetchRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back.id, rec.id);
        assert_eq!(back.retry_count, 1);
    }

    #[test]
    fn id_validation() {
        assert!(is_valid_id("0123456789abcdef01234567"));
        assert!(!is_valid_id("0123456789abcdef0123456"));
        assert!(!is_valid_id("0123456789abcdef012345678"));
        assert!(!is_valid_id("0123456789abcdef0123456z"));
    }
}

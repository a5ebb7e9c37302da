//! JSON envelopes for the four queues. One shape per queue; the wire
//! format is camelCase to stay compatible with existing consumers.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Published to `scrape.requests` by the control plane (initial submission
/// and retries). `retry_count` counts attempts already consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub id: String,
    pub url: String,
    pub retry_count: u32,
    pub priority: u8,
}

/// Published to `scrape.started` by a worker just before it opens a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeStarted {
    pub id: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub user_agent: String,
}

/// Published to `scrape.results` on a completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub id: String,
    pub url: String,
    pub success: bool,
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
}

/// Published to `scrape.failures` on a classified failure. The worker only
/// reports; the retry decision belongs to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeFailure {
    pub id: String,
    pub url: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub retry_count: u32,
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(|e| Error::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips() {
        let msg = ScrapeRequest {
            id: "0123456789abcdef01234567".to_string(),
            url: "https://example.com".to_string(),
            retry_count: 0,
            priority: 1,
        };
        let bytes = encode(&msg).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["retryCount"], 0);
        let back: ScrapeRequest = decode(&bytes).unwrap();
        assert_eq!(back.url, msg.url);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode::<ScrapeRequest>(b"not json").is_err());
    }

    #[test]
    fn result_omits_absent_fields() {
        let msg = ScrapeResult {
            id: "0123456789abcdef01234567".to_string(),
            url: "https://example.com".to_string(),
            success: false,
            content: None,
            content_type: None,
            http_status: Some(503),
            error_message: Some("Server error 503: Service Unavailable".to_string()),
            final_url: None,
            redirect_chain: Vec::new(),
            content_hash: None,
            content_length: None,
            response_time: None,
            user_agent: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("content").is_none());
        assert_eq!(v["httpStatus"], 503);
    }
}

//! Submission: canonicalize, dedup against recent scrapes, create the
//! PENDING record, and emit the scrape request. A bad URL never fails the
//! batch; per-item errors surface in `skipped`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use webtrawl_core::message::{self, ScrapeRequest};
use webtrawl_core::normalize::canonical;
use webtrawl_core::record::NewFetchRecord;
use webtrawl_core::{Config, QueueBus, QueueName, Repository, Result, ScrapeStatus};

pub struct ControlPlane {
    repo: Arc<dyn Repository>,
    bus: Arc<dyn QueueBus>,
    cfg: Config,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    /// Raw URLs accepted for scraping, in submission order.
    pub submitted: Vec<String>,
    pub skipped: Vec<SkippedUrl>,
    /// Ids of the records created for this batch.
    pub queued: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedUrl {
    pub url: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_available_at: Option<DateTime<Utc>>,
}

enum Decision {
    Queued(String),
    Skipped(SkippedUrl),
}

impl ControlPlane {
    pub fn new(repo: Arc<dyn Repository>, bus: Arc<dyn QueueBus>, cfg: Config) -> Self {
        Self { repo, bus, cfg }
    }

    pub async fn submit(&self, urls: &[String]) -> SubmitOutcome {
        let mut out = SubmitOutcome::default();
        for raw in urls {
            match self.submit_one(raw).await {
                Ok(Decision::Queued(id)) => {
                    out.submitted.push(raw.clone());
                    out.queued.push(id);
                }
                Ok(Decision::Skipped(skipped)) => out.skipped.push(skipped),
                Err(e) => {
                    tracing::warn!(url = %raw, error = %e, "submission failed");
                    out.skipped.push(SkippedUrl {
                        url: raw.clone(),
                        reason: format!("Processing error: {e}"),
                        next_available_at: None,
                    });
                }
            }
        }
        out
    }

    async fn submit_one(&self, raw: &str) -> Result<Decision> {
        let window = self.cfg.scrape_interval();
        if let Some(recent) = self.repo.get_recent_by_url(raw, window).await? {
            let skipped = match (recent.status, recent.fetched_at) {
                (ScrapeStatus::Success, Some(fetched_at)) => {
                    // Direct resubmission of the stored canonical form gets
                    // the window message; everything else (redirect-chain
                    // hits, variant spellings) is reported as a redirect
                    // dedup.
                    let reason = if recent.url == raw.trim() {
                        format!(
                            "Successfully scraped within {} minutes",
                            self.cfg.scrape_interval_minutes
                        )
                    } else {
                        "Already scraped via redirect".to_string()
                    };
                    SkippedUrl {
                        url: raw.to_string(),
                        reason,
                        next_available_at: Some(fetched_at + window),
                    }
                }
                (status, _) if status.is_active() => SkippedUrl {
                    url: raw.to_string(),
                    reason: format!("Already queued (status={status})"),
                    next_available_at: None,
                },
                (status, _) => SkippedUrl {
                    url: raw.to_string(),
                    reason: format!("Recent request exists with status: {status}"),
                    next_available_at: None,
                },
            };
            return Ok(Decision::Skipped(skipped));
        }

        let url = canonical(raw);
        let record = self
            .repo
            .create(NewFetchRecord {
                url: url.clone(),
                status: ScrapeStatus::Pending,
                retry_count: 0,
            })
            .await?;
        self.bus
            .publish(
                QueueName::Requests,
                message::encode(&ScrapeRequest {
                    id: record.id.clone(),
                    url,
                    retry_count: 0,
                    priority: 1,
                })?,
            )
            .await?;
        tracing::info!(id = %record.id, url = %record.url, "queued scrape request");
        Ok(Decision::Queued(record.id))
    }
}

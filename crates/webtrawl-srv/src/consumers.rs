//! Control-plane result consumers.
//!
//! Three independent, idempotent consumers advance records through the
//! state machine. The retry decision lives here, not in the worker: the
//! authoritative retry count is the stored one, and centralizing the
//! decision avoids split-brain between worker-local counters and the
//! record.

use chrono::Utc;
use std::sync::Arc;
use webtrawl_core::message::{self, ScrapeFailure, ScrapeRequest, ScrapeResult, ScrapeStarted};
use webtrawl_core::normalize::canonical;
use webtrawl_core::record::{Patch, RecordPatch};
use webtrawl_core::{Config, QueueBus, QueueHandler, QueueName, Repository, Result, ScrapeStatus};

/// Subscribe the three consumers on their queues.
pub async fn start_consumers(
    repo: Arc<dyn Repository>,
    bus: Arc<dyn QueueBus>,
    cfg: Config,
) -> Result<()> {
    bus.subscribe(
        QueueName::Started,
        Arc::new(StartedConsumer { repo: repo.clone() }),
    )
    .await?;
    bus.subscribe(
        QueueName::Results,
        Arc::new(ResultConsumer { repo: repo.clone() }),
    )
    .await?;
    bus.subscribe(
        QueueName::Failures,
        Arc::new(FailureConsumer {
            repo,
            bus: bus.clone(),
            cfg,
        }),
    )
    .await?;
    Ok(())
}

pub struct StartedConsumer {
    pub repo: Arc<dyn Repository>,
}

#[async_trait::async_trait]
impl QueueHandler for StartedConsumer {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let msg: ScrapeStarted = message::decode(payload)?;
        let Some(record) = self.repo.find_by_id(&msg.id).await? else {
            tracing::warn!(id = %msg.id, "started event for unknown record");
            return Ok(());
        };
        // The three queues are independent, so a redelivered Started can
        // arrive after the Result. Never regress a terminal record.
        if record.status.is_terminal() {
            tracing::warn!(id = %msg.id, status = %record.status, "ignoring late started event");
            return Ok(());
        }
        self.repo
            .update(
                &msg.id,
                RecordPatch {
                    status: Some(ScrapeStatus::Processing),
                    user_agent: Patch::Set(msg.user_agent),
                    error_message: Patch::Clear,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

pub struct ResultConsumer {
    pub repo: Arc<dyn Repository>,
}

#[async_trait::async_trait]
impl QueueHandler for ResultConsumer {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let msg: ScrapeResult = message::decode(payload)?;
        if self.repo.find_by_id(&msg.id).await?.is_none() {
            tracing::warn!(id = %msg.id, "result event for unknown record");
            return Ok(());
        }

        // Chain entries are stored canonical, same as `url`, so the
        // redirect-chain dedup query is a plain string match.
        let chain: Vec<String> = msg.redirect_chain.iter().map(|u| canonical(u)).collect();
        let mut patch = RecordPatch {
            final_url: msg.final_url.into(),
            redirect_chain: Some(chain),
            response_time: msg.response_time.into(),
            user_agent: msg.user_agent.into(),
            http_status: msg.http_status.into(),
            fetched_at: Patch::Set(Utc::now()),
            ..Default::default()
        };
        if msg.success {
            patch.status = Some(ScrapeStatus::Success);
            patch.content = msg.content.into();
            patch.content_type =
                Patch::Set(msg.content_type.unwrap_or_else(|| "text/html".to_string()));
            patch.content_hash = msg.content_hash.into();
            patch.content_length = msg.content_length.into();
            patch.error_message = Patch::Clear;
        } else {
            patch.status = Some(ScrapeStatus::Failed);
            patch.error_message = Patch::Set(
                msg.error_message
                    .unwrap_or_else(|| "Scrape failed".to_string()),
            );
            patch.content = Patch::Clear;
            patch.content_type = Patch::Clear;
            patch.content_hash = Patch::Clear;
            patch.content_length = Patch::Clear;
        }
        self.repo.update(&msg.id, patch).await?;
        Ok(())
    }
}

pub struct FailureConsumer {
    pub repo: Arc<dyn Repository>,
    pub bus: Arc<dyn QueueBus>,
    pub cfg: Config,
}

#[async_trait::async_trait]
impl QueueHandler for FailureConsumer {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let msg: ScrapeFailure = message::decode(payload)?;
        if self.repo.find_by_id(&msg.id).await?.is_none() {
            tracing::warn!(id = %msg.id, "failure event for unknown record");
            return Ok(());
        }

        let max = self.cfg.max_retries;
        if msg.retryable && msg.retry_count < max {
            let next = msg.retry_count + 1;
            self.repo
                .update(
                    &msg.id,
                    RecordPatch {
                        status: Some(ScrapeStatus::Pending),
                        retry_count: Some(next),
                        // Retry breadcrumb: a PENDING record carrying the
                        // last attempt's error.
                        error_message: Patch::Set(format!(
                            "Retry {next}/{max}: {}",
                            msg.error_message
                        )),
                        http_status: msg.http_status.into(),
                        content: Patch::Clear,
                        content_type: Patch::Clear,
                        content_hash: Patch::Clear,
                        fetched_at: Patch::Clear,
                        ..Default::default()
                    },
                )
                .await?;
            self.bus
                .publish(
                    QueueName::Requests,
                    message::encode(&ScrapeRequest {
                        id: msg.id.clone(),
                        url: msg.url.clone(),
                        retry_count: next,
                        priority: 2,
                    })?,
                )
                .await?;
            tracing::info!(id = %msg.id, attempt = next, "requeued for retry");
        } else {
            let reason = if msg.retryable {
                format!("Maximum retries ({max}) exceeded")
            } else {
                "Error is not retryable".to_string()
            };
            self.repo
                .update(
                    &msg.id,
                    RecordPatch {
                        status: Some(ScrapeStatus::Failed),
                        error_message: Patch::Set(format!("{reason}: {}", msg.error_message)),
                        http_status: msg.http_status.into(),
                        content: Patch::Clear,
                        content_type: Patch::Clear,
                        content_hash: Patch::Clear,
                        content_length: Patch::Clear,
                        fetched_at: Patch::Set(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!(id = %msg.id, %reason, "scrape failed terminally");
        }
        Ok(())
    }
}

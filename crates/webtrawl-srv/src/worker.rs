//! Worker plane: one scrape attempt per dequeued request.
//!
//! The worker never reads or writes the record store and never decides
//! whether to retry; it renders, classifies, and reports. The inbound
//! message is acked only after the outbound result/failure publish
//! succeeded, so a publish failure leaves a stuck PENDING record for the
//! stale sweep instead of losing the outcome silently.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use webtrawl_core::classify::{classify_error, classify_status, Classification};
use webtrawl_core::message::{self, ScrapeFailure, ScrapeRequest, ScrapeResult, ScrapeStarted};
use webtrawl_core::{
    Config, PageBackend, QueueBus, QueueHandler, QueueName, RenderRequest, RenderedPage, Result,
};

pub struct Worker {
    bus: Arc<dyn QueueBus>,
    renderer: Arc<dyn PageBackend>,
    cfg: Config,
}

impl Worker {
    pub fn new(bus: Arc<dyn QueueBus>, renderer: Arc<dyn PageBackend>, cfg: Config) -> Self {
        Self { bus, renderer, cfg }
    }

    /// Open one request subscription per configured page slot. Prefetch=1
    /// per subscription is what bounds this worker's in-flight attempts.
    pub async fn start(&self) -> Result<()> {
        for _ in 0..self.cfg.concurrent_scrapers.max(1) {
            let handler = Arc::new(AttemptHandler {
                bus: self.bus.clone(),
                renderer: self.renderer.clone(),
                cfg: self.cfg.clone(),
            });
            self.bus.subscribe(QueueName::Requests, handler).await?;
        }
        Ok(())
    }
}

struct AttemptHandler {
    bus: Arc<dyn QueueBus>,
    renderer: Arc<dyn PageBackend>,
    cfg: Config,
}

#[async_trait::async_trait]
impl QueueHandler for AttemptHandler {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let request: ScrapeRequest = message::decode(payload)?;
        self.attempt(&request).await
    }
}

impl AttemptHandler {
    fn render_request(&self, url: &str) -> RenderRequest {
        RenderRequest {
            url: url.to_string(),
            user_agent: self.cfg.user_agent.clone(),
            wait: self.cfg.wait_strategy,
            nav_timeout: self.cfg.nav_timeout,
            dynamic_wait: self.cfg.dynamic_wait,
            block_images: self.cfg.disable_images,
            block_css: self.cfg.disable_css,
            max_html_bytes: self.cfg.max_html_bytes,
        }
    }

    async fn attempt(&self, request: &ScrapeRequest) -> Result<()> {
        // Fire-and-forget: a lost started event costs observability, not
        // correctness.
        let started = ScrapeStarted {
            id: request.id.clone(),
            url: request.url.clone(),
            started_at: Utc::now(),
            user_agent: self.cfg.user_agent.clone(),
        };
        if let Err(e) = self
            .bus
            .publish(QueueName::Started, message::encode(&started)?)
            .await
        {
            tracing::warn!(id = %request.id, error = %e, "failed to publish started event");
        }

        let t0 = Instant::now();
        let rendered = self.renderer.render(&self.render_request(&request.url)).await;
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        match rendered {
            Ok(page) => match page.status {
                None => {
                    self.publish_failure(
                        request,
                        Classification {
                            retryable: true,
                            temporary: true,
                            reason: "No response received".to_string(),
                            status: None,
                        },
                    )
                    .await
                }
                Some(status) if status >= 400 => {
                    self.publish_failure(request, classify_status(status)).await
                }
                Some(status) => self.publish_result(request, page, status, elapsed_ms).await,
            },
            Err(e) => {
                let classified = classify_error(&e.to_string(), None);
                tracing::debug!(id = %request.id, reason = %classified.reason, "attempt errored");
                self.publish_failure(request, classified).await
            }
        }
    }

    async fn publish_result(
        &self,
        request: &ScrapeRequest,
        page: RenderedPage,
        status: u16,
        elapsed_ms: u64,
    ) -> Result<()> {
        let content = page.html;
        let content_length = content.len() as u64;
        let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
        let msg = ScrapeResult {
            id: request.id.clone(),
            url: request.url.clone(),
            success: true,
            content: Some(content),
            content_type: Some(page.content_type.unwrap_or_else(|| "text/html".to_string())),
            http_status: Some(status),
            error_message: None,
            final_url: Some(page.final_url),
            redirect_chain: page.redirect_chain,
            content_hash: Some(content_hash),
            content_length: Some(content_length),
            response_time: Some(elapsed_ms),
            user_agent: Some(self.cfg.user_agent.clone()),
        };
        self.bus
            .publish(QueueName::Results, message::encode(&msg)?)
            .await
    }

    async fn publish_failure(
        &self,
        request: &ScrapeRequest,
        classified: Classification,
    ) -> Result<()> {
        let msg = ScrapeFailure {
            id: request.id.clone(),
            url: request.url.clone(),
            error_message: classified.reason,
            http_status: classified.status,
            retryable: classified.retryable,
            retry_count: request.retry_count,
        };
        self.bus
            .publish(QueueName::Failures, message::encode(&msg)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use webtrawl_core::Error;
    use webtrawl_local::MemoryQueueBus;

    struct FixedRenderer {
        outcome: Mutex<Option<Result<RenderedPage>>>,
    }

    #[async_trait::async_trait]
    impl PageBackend for FixedRenderer {
        async fn render(&self, _req: &RenderRequest) -> Result<RenderedPage> {
            self.outcome
                .lock()
                .await
                .take()
                .unwrap_or_else(|| Err(Error::Render("unscripted".to_string())))
        }
    }

    struct Capture {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl QueueHandler for Capture {
        async fn handle(&self, payload: &[u8]) -> Result<()> {
            self.seen.lock().await.push(payload.to_vec());
            Ok(())
        }
    }

    impl Capture {
        async fn wait_for(&self, n: usize) -> Vec<Vec<u8>> {
            for _ in 0..200 {
                if self.seen.lock().await.len() >= n {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.seen.lock().await.clone()
        }
    }

    fn handler(bus: Arc<MemoryQueueBus>, outcome: Result<RenderedPage>) -> AttemptHandler {
        AttemptHandler {
            bus,
            renderer: Arc::new(FixedRenderer {
                outcome: Mutex::new(Some(outcome)),
            }),
            cfg: Config::default(),
        }
    }

    fn request() -> ScrapeRequest {
        ScrapeRequest {
            id: "0123456789abcdef01234567".to_string(),
            url: "https://x.test".to_string(),
            retry_count: 0,
            priority: 1,
        }
    }

    fn page(status: u16, html: &str) -> RenderedPage {
        RenderedPage {
            final_url: "https://x.test".to_string(),
            status: Some(status),
            content_type: Some("text/html".to_string()),
            html: html.to_string(),
            redirect_chain: Vec::new(),
            elapsed_ms: 5,
        }
    }

    #[tokio::test]
    async fn ok_page_publishes_hashed_result() {
        let bus = Arc::new(MemoryQueueBus::default());
        let results = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(QueueName::Results, results.clone()).await.unwrap();

        handler(bus, Ok(page(200, "<html>OK</html>")))
            .attempt(&request())
            .await
            .unwrap();

        let seen = results.wait_for(1).await;
        let msg: ScrapeResult = message::decode(&seen[0]).unwrap();
        assert!(msg.success);
        assert_eq!(msg.content.as_deref(), Some("<html>OK</html>"));
        assert_eq!(msg.content_length, Some(15));
        assert_eq!(
            msg.content_hash.as_deref(),
            Some(hex::encode(Sha256::digest(b"<html>OK</html>")).as_str())
        );
    }

    #[tokio::test]
    async fn http_error_page_publishes_classified_failure() {
        let bus = Arc::new(MemoryQueueBus::default());
        let failures = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(QueueName::Failures, failures.clone()).await.unwrap();

        handler(bus, Ok(page(503, "<html>down</html>")))
            .attempt(&request())
            .await
            .unwrap();

        let seen = failures.wait_for(1).await;
        let msg: ScrapeFailure = message::decode(&seen[0]).unwrap();
        assert!(msg.retryable);
        assert_eq!(msg.http_status, Some(503));
        assert_eq!(msg.error_message, "Server error 503: Service Unavailable");
    }

    #[tokio::test]
    async fn missing_response_is_retryable_failure() {
        let bus = Arc::new(MemoryQueueBus::default());
        let failures = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(QueueName::Failures, failures.clone()).await.unwrap();

        let mut no_response = page(200, "<html></html>");
        no_response.status = None;
        handler(bus, Ok(no_response)).attempt(&request()).await.unwrap();

        let seen = failures.wait_for(1).await;
        let msg: ScrapeFailure = message::decode(&seen[0]).unwrap();
        assert!(msg.retryable);
        assert_eq!(msg.error_message, "No response received");
        assert_eq!(msg.http_status, None);
    }

    #[tokio::test]
    async fn render_error_is_classified() {
        let bus = Arc::new(MemoryQueueBus::default());
        let failures = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(QueueName::Failures, failures.clone()).await.unwrap();

        handler(
            bus,
            Err(Error::Render("net::ERR_NAME_NOT_RESOLVED".to_string())),
        )
        .attempt(&request())
        .await
        .unwrap();

        let seen = failures.wait_for(1).await;
        let msg: ScrapeFailure = message::decode(&seen[0]).unwrap();
        assert!(!msg.retryable);
        assert_eq!(msg.error_message, "DNS resolution failed");
        assert_eq!(msg.http_status, Some(404));
    }
}

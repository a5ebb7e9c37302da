//! End-to-end pipeline contracts over the in-memory bus and store, with a
//! scripted page backend standing in for the browser.

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use webtrawl::consumers::start_consumers;
use webtrawl::control::ControlPlane;
use webtrawl::worker::Worker;
use webtrawl_core::record::{Patch, RecordPatch};
use webtrawl_core::{
    Config, Error, FetchRecord, PageBackend, RenderRequest, RenderedPage, Repository, Result,
    ScrapeStatus,
};
use webtrawl_local::{MemoryQueueBus, RecordStore};

/// Replays a queue of canned outcomes per URL and counts render calls.
struct ScriptedRenderer {
    script: Mutex<HashMap<String, VecDeque<Result<RenderedPage>>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedRenderer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    async fn stage(&self, url: &str, outcomes: Vec<Result<RenderedPage>>) {
        self.script
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .extend(outcomes);
    }

    async fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().await.get(url).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl PageBackend for ScriptedRenderer {
    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        *self
            .calls
            .lock()
            .await
            .entry(req.url.clone())
            .or_default() += 1;
        self.script
            .lock()
            .await
            .get_mut(&req.url)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Err(Error::Render(format!("no script for {}", req.url))))
    }
}

fn ok_page(final_url: &str, html: &str, chain: &[&str]) -> Result<RenderedPage> {
    Ok(RenderedPage {
        final_url: final_url.to_string(),
        status: Some(200),
        content_type: Some("text/html".to_string()),
        html: html.to_string(),
        redirect_chain: chain.iter().map(|s| s.to_string()).collect(),
        elapsed_ms: 3,
    })
}

fn status_page(status: u16) -> Result<RenderedPage> {
    Ok(RenderedPage {
        final_url: "https://x.test".to_string(),
        status: Some(status),
        content_type: Some("text/html".to_string()),
        html: "<html>err</html>".to_string(),
        redirect_chain: Vec::new(),
        elapsed_ms: 3,
    })
}

struct Harness {
    repo: Arc<RecordStore>,
    control: ControlPlane,
    renderer: Arc<ScriptedRenderer>,
}

async fn harness() -> Harness {
    let cfg = Config::default();
    let repo = Arc::new(RecordStore::in_memory());
    let repo_dyn: Arc<dyn Repository> = repo.clone();
    let bus = Arc::new(MemoryQueueBus::default());
    let renderer = ScriptedRenderer::new();

    start_consumers(repo_dyn.clone(), bus.clone(), cfg.clone())
        .await
        .unwrap();
    Worker::new(bus.clone(), renderer.clone(), cfg.clone())
        .start()
        .await
        .unwrap();

    Harness {
        repo,
        control: ControlPlane::new(repo_dyn, bus, cfg),
        renderer,
    }
}

async fn wait_for_terminal(repo: &RecordStore, id: &str) -> FetchRecord {
    for _ in 0..500 {
        if let Some(rec) = repo.find_by_id(id).await.unwrap() {
            if rec.status.is_terminal() {
                return rec;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("record {id} never reached a terminal state");
}

#[tokio::test]
async fn happy_path_scrape() {
    let h = harness().await;
    h.renderer
        .stage(
            "https://example.com",
            vec![ok_page("https://example.com", "<html>OK</html>", &[])],
        )
        .await;

    let out = h.control.submit(&["https://example.com".to_string()]).await;
    assert_eq!(out.queued.len(), 1);

    let rec = wait_for_terminal(&h.repo, &out.queued[0]).await;
    assert_eq!(rec.status, ScrapeStatus::Success);
    assert_eq!(rec.content.as_deref(), Some("<html>OK</html>"));
    assert_eq!(
        rec.content_hash.as_deref(),
        Some(hex::encode(Sha256::digest(b"<html>OK</html>")).as_str())
    );
    assert_eq!(rec.retry_count, 0);
    assert!(rec.redirect_chain.is_empty());
    assert_eq!(rec.http_status, Some(200));
    assert!(rec.error_message.is_none(), "I1");
    assert!(rec.fetched_at.is_some());
}

#[tokio::test]
async fn redirect_dedup() {
    let h = harness().await;
    h.renderer
        .stage(
            "https://ynet.co.il",
            vec![ok_page(
                "https://www.ynet.co.il/",
                "<html>news</html>",
                &["https://ynet.co.il", "https://www.ynet.co.il"],
            )],
        )
        .await;

    let out = h.control.submit(&["ynet.co.il".to_string()]).await;
    assert_eq!(out.queued.len(), 1);
    let rec = wait_for_terminal(&h.repo, &out.queued[0]).await;
    assert_eq!(rec.status, ScrapeStatus::Success);

    let again = h.control.submit(&["www.ynet.co.il".to_string()]).await;
    assert!(again.queued.is_empty());
    assert_eq!(again.skipped.len(), 1);
    assert_eq!(again.skipped[0].reason, "Already scraped via redirect");
}

#[tokio::test]
async fn retryable_failure_then_success() {
    let h = harness().await;
    h.renderer
        .stage(
            "https://flaky.test",
            vec![
                Err(Error::Render("net::ERR_CONNECTION_REFUSED".to_string())),
                ok_page("https://flaky.test", "<html>up</html>", &[]),
            ],
        )
        .await;

    let out = h.control.submit(&["https://flaky.test".to_string()]).await;
    let rec = wait_for_terminal(&h.repo, &out.queued[0]).await;
    assert_eq!(rec.status, ScrapeStatus::Success);
    assert_eq!(rec.retry_count, 1);
    assert!(rec.error_message.is_none(), "breadcrumb cleared on success");
    assert_eq!(h.renderer.calls_for("https://flaky.test").await, 2);
}

#[tokio::test]
async fn non_retryable_failure() {
    let h = harness().await;
    h.renderer
        .stage(
            "https://nope.invalid",
            vec![Err(Error::Render(
                "net::ERR_NAME_NOT_RESOLVED".to_string(),
            ))],
        )
        .await;

    let out = h.control.submit(&["https://nope.invalid".to_string()]).await;
    let rec = wait_for_terminal(&h.repo, &out.queued[0]).await;
    assert_eq!(rec.status, ScrapeStatus::Failed);
    assert_eq!(rec.retry_count, 0);
    assert_eq!(
        rec.error_message.as_deref(),
        Some("Error is not retryable: DNS resolution failed")
    );
    assert_eq!(rec.http_status, Some(404));
    assert!(rec.content.is_none(), "I2");
    assert_eq!(h.renderer.calls_for("https://nope.invalid").await, 1);
}

#[tokio::test]
async fn retry_exhaustion_after_repeated_503() {
    let h = harness().await;
    h.renderer
        .stage(
            "https://down.test",
            vec![
                status_page(503),
                status_page(503),
                status_page(503),
                status_page(503),
            ],
        )
        .await;

    let out = h.control.submit(&["https://down.test".to_string()]).await;
    let rec = wait_for_terminal(&h.repo, &out.queued[0]).await;
    assert_eq!(rec.status, ScrapeStatus::Failed);
    assert_eq!(rec.retry_count, 3, "I3: retryCount <= MAX_RETRIES");
    assert_eq!(
        rec.error_message.as_deref(),
        Some("Maximum retries (3) exceeded: Server error 503: Service Unavailable")
    );
    // Initial attempt plus three retries.
    assert_eq!(h.renderer.calls_for("https://down.test").await, 4);
}

#[tokio::test]
async fn dedup_window_expires() {
    let h = harness().await;
    h.renderer
        .stage(
            "https://a.test",
            vec![
                ok_page("https://a.test", "<html>1</html>", &[]),
                ok_page("https://a.test", "<html>2</html>", &[]),
            ],
        )
        .await;

    let out = h.control.submit(&["https://a.test".to_string()]).await;
    let rec = wait_for_terminal(&h.repo, &out.queued[0]).await;
    assert_eq!(rec.status, ScrapeStatus::Success);

    // Half-way through the window: still deduplicated, with the release
    // time reported.
    let fetched_at = Utc::now() - ChronoDuration::minutes(30);
    h.repo
        .update(
            &rec.id,
            RecordPatch {
                fetched_at: Patch::Set(fetched_at),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mid = h.control.submit(&["https://a.test".to_string()]).await;
    assert!(mid.queued.is_empty());
    assert_eq!(
        mid.skipped[0].next_available_at,
        Some(fetched_at + ChronoDuration::minutes(60))
    );

    // Past the window: a new attempt is queued.
    h.repo
        .update(
            &rec.id,
            RecordPatch {
                fetched_at: Patch::Set(Utc::now() - ChronoDuration::minutes(61)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let late = h.control.submit(&["https://a.test".to_string()]).await;
    assert_eq!(late.queued.len(), 1);
    assert_ne!(late.queued[0], rec.id, "a fresh record is created");
    let rec2 = wait_for_terminal(&h.repo, &late.queued[0]).await;
    assert_eq!(rec2.status, ScrapeStatus::Success);
    assert_eq!(rec2.content.as_deref(), Some("<html>2</html>"));
}

#[tokio::test]
async fn active_record_blocks_duplicate_submission() {
    let cfg = Config::default();
    let repo = Arc::new(RecordStore::in_memory());
    let repo_dyn: Arc<dyn Repository> = repo.clone();
    let bus = Arc::new(MemoryQueueBus::default());
    // Consumers only; no worker, so the record stays PENDING.
    start_consumers(repo_dyn.clone(), bus.clone(), cfg.clone())
        .await
        .unwrap();
    let control = ControlPlane::new(repo_dyn, bus, cfg);

    let first = control.submit(&["https://slow.test".to_string()]).await;
    assert_eq!(first.queued.len(), 1);
    let second = control.submit(&["https://slow.test".to_string()]).await;
    assert!(second.queued.is_empty());
    assert_eq!(second.skipped[0].reason, "Already queued (status=PENDING)");
}

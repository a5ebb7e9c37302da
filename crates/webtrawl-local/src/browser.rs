//! Headless-Chromium page backend.
//!
//! One long-lived browser process per worker; every render opens a fresh
//! page and closes it on all exit paths. The main-document request is
//! tracked through CDP network events to recover the HTTP status, the
//! content type, and the redirect chain; blocked resource types are
//! aborted through Fetch interception before they hit the network.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch;
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::cdp::browser_protocol::page::{
    EventDomContentEventFired, EventLoadEventFired, FrameId,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures_util::StreamExt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use webtrawl_core::{
    Config, Error, PageBackend, RenderRequest, RenderedPage, Result, WaitStrategy,
};

pub struct ChromiumRenderer {
    browser: Browser,
    _profile: TempProfileDir,
    _events: tokio::task::JoinHandle<()>,
}

impl ChromiumRenderer {
    /// Launch the shared browser process. Fails when no Chromium
    /// executable can be found.
    pub async fn launch(config: &Config) -> Result<Self> {
        let executable = match &config.chromium_path {
            Some(path) if path.exists() => path.clone(),
            Some(path) => {
                return Err(Error::NotConfigured(format!(
                    "chromium executable not found at {}",
                    path.display()
                )))
            }
            None => find_chromium().ok_or_else(|| {
                Error::NotConfigured(
                    "chromium executable not found; install chromium or set \
                     WEBTRAWL_CHROMIUM_PATH"
                        .to_string(),
                )
            })?,
        };

        let profile = TempProfileDir::new()?;
        let browser_cfg = BrowserConfig::builder()
            .new_headless_mode()
            .chrome_executable(executable)
            .user_data_dir(&profile.path)
            .viewport(Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .args(vec![
                "--disable-gpu".to_string(),
                "--no-first-run".to_string(),
                "--no-default-browser-check".to_string(),
            ])
            .build()
            .map_err(|e| Error::NotConfigured(format!("failed to configure chromium: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_cfg)
            .await
            .map_err(|e| Error::NotConfigured(format!("failed to launch chromium: {e}")))?;
        let events = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

        Ok(Self {
            browser,
            _profile: profile,
            _events: events,
        })
    }
}

#[async_trait::async_trait]
impl PageBackend for ChromiumRenderer {
    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        let t0 = Instant::now();
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(cdp_err)?;
        let result = drive(&page, req).await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "page close failed");
        }
        let mut rendered = result?;
        rendered.elapsed_ms = t0.elapsed().as_millis() as u64;
        Ok(rendered)
    }
}

async fn drive(page: &Page, req: &RenderRequest) -> Result<RenderedPage> {
    page.set_user_agent(req.user_agent.clone())
        .await
        .map_err(cdp_err)?;

    let tracker = NavTracker::default();
    spawn_network_tracker(page, tracker.clone()).await?;
    // Subscribed before goto so lifecycle events fired mid-navigation are
    // still observed.
    let mut dom_parsed = page
        .event_listener::<EventDomContentEventFired>()
        .await
        .map_err(cdp_err)?;
    let mut loaded = page
        .event_listener::<EventLoadEventFired>()
        .await
        .map_err(cdp_err)?;
    install_resource_blocking(page, req).await?;

    let navigate = async {
        page.goto(req.url.as_str()).await.map_err(cdp_err)?;
        match req.wait {
            WaitStrategy::Fast => {
                let _ = dom_parsed.next().await;
            }
            WaitStrategy::Basic => {
                let _ = loaded.next().await;
            }
            WaitStrategy::Moderate => wait_for_network_idle(&tracker, 0).await,
            WaitStrategy::Comprehensive => wait_for_network_idle(&tracker, 2).await,
        }
        Ok::<(), Error>(())
    };
    match tokio::time::timeout(req.nav_timeout, navigate).await {
        Ok(r) => r?,
        Err(_) => {
            return Err(Error::Render(format!(
                "Navigation timeout of {} ms exceeded",
                req.nav_timeout.as_millis()
            )))
        }
    }

    if !req.dynamic_wait.is_zero() {
        sleep(req.dynamic_wait).await;
    }

    let html = page.content().await.map_err(cdp_err)?;
    if html.trim().is_empty() {
        return Err(Error::Render("renderer returned empty HTML".to_string()));
    }
    if html.len() > req.max_html_bytes {
        return Err(Error::Render(format!(
            "rendered HTML too large ({} bytes > {})",
            html.len(),
            req.max_html_bytes
        )));
    }

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| req.url.clone());
    let doc = tracker.snapshot();
    let redirect_chain = doc.redirect_chain();

    Ok(RenderedPage {
        final_url,
        status: doc.status,
        content_type: doc.content_type,
        html,
        redirect_chain,
        elapsed_ms: 0,
    })
}

#[derive(Default)]
struct DocState {
    main_frame: Option<FrameId>,
    request_id: Option<network::RequestId>,
    /// Document URLs in navigation order; the last one is the final URL.
    urls: Vec<String>,
    status: Option<u16>,
    content_type: Option<String>,
}

impl DocState {
    fn redirect_chain(&self) -> Vec<String> {
        if self.urls.len() > 1 {
            self.urls[..self.urls.len() - 1].to_vec()
        } else {
            Vec::new()
        }
    }
}

#[derive(Clone, Default)]
struct NavTracker {
    doc: Arc<Mutex<DocState>>,
    in_flight: Arc<AtomicIsize>,
}

impl NavTracker {
    fn snapshot(&self) -> DocState {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        DocState {
            main_frame: doc.main_frame.clone(),
            request_id: doc.request_id.clone(),
            urls: doc.urls.clone(),
            status: doc.status,
            content_type: doc.content_type.clone(),
        }
    }
}

async fn spawn_network_tracker(page: &Page, tracker: NavTracker) -> Result<()> {
    let mut will_be_sent = page
        .event_listener::<network::EventRequestWillBeSent>()
        .await
        .map_err(cdp_err)?;
    let mut response_received = page
        .event_listener::<network::EventResponseReceived>()
        .await
        .map_err(cdp_err)?;
    let mut finished = page
        .event_listener::<network::EventLoadingFinished>()
        .await
        .map_err(cdp_err)?;
    let mut failed = page
        .event_listener::<network::EventLoadingFailed>()
        .await
        .map_err(cdp_err)?;

    let t = tracker.clone();
    tokio::spawn(async move {
        while let Some(event) = will_be_sent.next().await {
            t.in_flight.fetch_add(1, Ordering::Relaxed);
            if !matches!(event.r#type, Some(network::ResourceType::Document)) {
                continue;
            }
            let mut doc = t.doc.lock().unwrap_or_else(|e| e.into_inner());
            match &doc.request_id {
                // First document request in the page is the main one;
                // remember its frame so iframes are ignored.
                None => {
                    doc.main_frame = event.frame_id.clone();
                    doc.request_id = Some(event.request_id.clone());
                    doc.urls.push(event.request.url.clone());
                }
                Some(id) if *id == event.request_id => {
                    // Same request id again means the browser followed a
                    // redirect.
                    if event.redirect_response.is_some() {
                        doc.urls.push(event.request.url.clone());
                    }
                }
                Some(_) => {}
            }
        }
    });

    let t = tracker.clone();
    tokio::spawn(async move {
        while let Some(event) = response_received.next().await {
            let mut doc = t.doc.lock().unwrap_or_else(|e| e.into_inner());
            if doc.request_id.as_ref() == Some(&event.request_id) {
                doc.status = u16::try_from(event.response.status).ok();
                if !event.response.mime_type.is_empty() {
                    doc.content_type = Some(event.response.mime_type.clone());
                }
            }
        }
    });

    let t = tracker.clone();
    tokio::spawn(async move {
        while (finished.next().await).is_some() {
            t.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    });

    let t = tracker;
    tokio::spawn(async move {
        while (failed.next().await).is_some() {
            t.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    });

    Ok(())
}

/// Abort blocked resource types at the Fetch-interception layer. Only the
/// blocked types are paused, so everything else proceeds untouched.
async fn install_resource_blocking(page: &Page, req: &RenderRequest) -> Result<()> {
    let mut blocked: Vec<network::ResourceType> = Vec::new();
    if req.block_images {
        blocked.extend([
            network::ResourceType::Image,
            network::ResourceType::Stylesheet,
            network::ResourceType::Font,
        ]);
    }
    if req.block_css && !blocked.contains(&network::ResourceType::Stylesheet) {
        blocked.push(network::ResourceType::Stylesheet);
    }
    if blocked.is_empty() {
        return Ok(());
    }

    let patterns = blocked
        .into_iter()
        .map(|resource_type| fetch::RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(resource_type),
            request_stage: Some(fetch::RequestStage::Request),
        })
        .collect();
    page.execute(fetch::EnableParams {
        patterns: Some(patterns),
        handle_auth_requests: Some(false),
    })
    .await
    .map_err(cdp_err)?;

    let mut paused = page
        .event_listener::<fetch::EventRequestPaused>()
        .await
        .map_err(cdp_err)?;
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let _ = page
                .execute(fetch::FailRequestParams {
                    request_id: event.request_id.clone(),
                    error_reason: network::ErrorReason::BlockedByClient,
                })
                .await;
        }
    });
    Ok(())
}

async fn wait_for_network_idle(tracker: &NavTracker, allowed: isize) {
    let idle_required = Duration::from_millis(500);
    let mut idle_since: Option<Instant> = None;
    loop {
        if tracker.in_flight.load(Ordering::Relaxed) <= allowed {
            let since = idle_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= idle_required {
                return;
            }
        } else {
            idle_since = None;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn cdp_err(e: chromiumoxide::error::CdpError) -> Error {
    Error::Render(e.to_string())
}

struct TempProfileDir {
    path: PathBuf,
}

impl TempProfileDir {
    fn new() -> Result<Self> {
        let base = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        for attempt in 0..10 {
            let path = base.join(format!("webtrawl-profile-{pid}-{nanos}-{attempt}"));
            if fs::create_dir_all(&path).is_ok() {
                return Ok(Self { path });
            }
        }
        Err(Error::NotConfigured(
            "failed to create a browser profile directory".to_string(),
        ))
    }
}

impl Drop for TempProfileDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Locate a Chromium executable: PATH first, then well-known install
/// locations.
pub fn find_chromium() -> Option<PathBuf> {
    if let Some(path) = find_on_path(&chromium_candidates()) {
        return Some(path);
    }
    platform_chromium_paths().into_iter().find(|p| p.exists())
}

fn find_on_path(candidates: &[&str]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates {
            let full = dir.join(candidate);
            if full.exists() {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(target_os = "windows")]
fn chromium_candidates() -> Vec<&'static str> {
    vec!["chromium.exe", "chrome.exe"]
}

#[cfg(target_os = "macos")]
fn chromium_candidates() -> Vec<&'static str> {
    vec!["chromium", "google-chrome", "chrome"]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn chromium_candidates() -> Vec<&'static str> {
    vec![
        "chromium",
        "chromium-browser",
        "google-chrome",
        "google-chrome-stable",
    ]
}

#[cfg(target_os = "windows")]
fn platform_chromium_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for base in [
        std::env::var_os("ProgramFiles"),
        std::env::var_os("ProgramFiles(x86)"),
    ]
    .into_iter()
    .flatten()
    {
        let base = PathBuf::from(base);
        paths.push(base.join("Google/Chrome/Application/chrome.exe"));
        paths.push(base.join("Chromium/Application/chrome.exe"));
    }
    paths
}

#[cfg(target_os = "macos")]
fn platform_chromium_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/local/bin/chromium"),
        PathBuf::from("/opt/homebrew/bin/chromium"),
    ]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn platform_chromium_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/chromium"),
        PathBuf::from("/usr/bin/chromium-browser"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/google-chrome-stable"),
        PathBuf::from("/snap/bin/chromium"),
    ]
}

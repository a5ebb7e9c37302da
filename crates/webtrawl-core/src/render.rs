//! The browser seam. A `PageBackend` turns one URL into one rendered DOM
//! snapshot; the worker owns everything around it (classification, hashing,
//! queue traffic).

use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to let a navigation settle before reading the DOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    /// DOM parsed (DOMContentLoaded).
    #[default]
    Fast,
    /// `load` event fired.
    Basic,
    /// Network idle, no outstanding connections.
    Moderate,
    /// Network idle, at most two outstanding connections for 500ms.
    Comprehensive,
}

impl WaitStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(WaitStrategy::Fast),
            "basic" => Some(WaitStrategy::Basic),
            "moderate" => Some(WaitStrategy::Moderate),
            "comprehensive" => Some(WaitStrategy::Comprehensive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaitStrategy::Fast => "fast",
            WaitStrategy::Basic => "basic",
            WaitStrategy::Moderate => "moderate",
            WaitStrategy::Comprehensive => "comprehensive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub user_agent: String,
    pub wait: WaitStrategy,
    pub nav_timeout: Duration,
    /// Extra settle time after the wait strategy completes. Zero disables.
    pub dynamic_wait: Duration,
    pub block_images: bool,
    pub block_css: bool,
    /// Upper bound on the serialized DOM; larger pages fail the attempt.
    pub max_html_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    /// Status of the main document response; `None` when the navigation
    /// produced no response at all.
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub html: String,
    /// URLs the browser followed to reach `final_url`, excluding
    /// `final_url` itself. Empty when there was no redirect.
    pub redirect_chain: Vec<String>,
    pub elapsed_ms: u64,
}

#[async_trait::async_trait]
pub trait PageBackend: Send + Sync {
    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage>;
}

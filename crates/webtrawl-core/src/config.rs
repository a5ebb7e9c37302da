//! Process configuration, collected once from `WEBTRAWL_*` environment
//! variables. Unset or unparseable values fall back to defaults.

use crate::render::WaitStrategy;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// AMQP broker DSN (`WEBTRAWL_AMQP_URL`).
    pub amqp_url: String,
    /// HTTP listen address for the control plane (`WEBTRAWL_HTTP_ADDR`).
    pub http_addr: String,
    /// Record-store directory; in-memory only when unset
    /// (`WEBTRAWL_DATA_DIR`).
    pub data_dir: Option<PathBuf>,
    /// Dedup window in minutes (`WEBTRAWL_SCRAPE_INTERVAL_MINUTES`).
    pub scrape_interval_minutes: i64,
    /// Retry cap per record (`WEBTRAWL_MAX_RETRIES`).
    pub max_retries: u32,
    /// Simultaneous pages per worker process
    /// (`WEBTRAWL_CONCURRENT_SCRAPERS`).
    pub concurrent_scrapers: usize,
    /// Navigation timeout (`WEBTRAWL_NAV_TIMEOUT_MS`).
    pub nav_timeout: Duration,
    /// Post-navigation settle (`WEBTRAWL_WAIT_STRATEGY`).
    pub wait_strategy: WaitStrategy,
    /// Abort image/stylesheet/font subresources
    /// (`WEBTRAWL_DISABLE_IMAGES`, default on).
    pub disable_images: bool,
    /// Abort stylesheet subresources (`WEBTRAWL_DISABLE_CSS`).
    pub disable_css: bool,
    /// Fixed pause after navigation (`WEBTRAWL_DYNAMIC_WAIT_MS`).
    pub dynamic_wait: Duration,
    /// PENDING records older than this are swept to FAILED
    /// (`WEBTRAWL_STALE_TIMEOUT_MINUTES`). Kept well beyond the queue
    /// message TTL so in-flight work is never swept.
    pub stale_timeout_minutes: i64,
    /// How often the control plane runs the stale sweep
    /// (`WEBTRAWL_SWEEP_INTERVAL_MINUTES`).
    pub sweep_interval: Duration,
    /// Queue message TTL (`WEBTRAWL_MESSAGE_TTL_MINUTES`).
    pub message_ttl: Duration,
    /// User agent sent by the browser (`WEBTRAWL_USER_AGENT`).
    pub user_agent: String,
    /// Explicit chromium executable (`WEBTRAWL_CHROMIUM_PATH`); searched
    /// for on PATH and well-known locations when unset.
    pub chromium_path: Option<PathBuf>,
    /// Upper bound on a rendered DOM (`WEBTRAWL_MAX_HTML_BYTES`).
    pub max_html_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            amqp_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            http_addr: "127.0.0.1:8080".to_string(),
            data_dir: None,
            scrape_interval_minutes: 60,
            max_retries: 3,
            concurrent_scrapers: 3,
            nav_timeout: Duration::from_millis(15_000),
            wait_strategy: WaitStrategy::Fast,
            disable_images: true,
            disable_css: false,
            dynamic_wait: Duration::ZERO,
            stale_timeout_minutes: 120,
            sweep_interval: Duration::from_secs(10 * 60),
            message_ttl: Duration::from_secs(60 * 60),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            chromium_path: None,
            max_html_bytes: 2_000_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            amqp_url: env_str("WEBTRAWL_AMQP_URL", &defaults.amqp_url),
            http_addr: env_str("WEBTRAWL_HTTP_ADDR", &defaults.http_addr),
            data_dir: env_opt("WEBTRAWL_DATA_DIR").map(PathBuf::from),
            scrape_interval_minutes: env_i64(
                "WEBTRAWL_SCRAPE_INTERVAL_MINUTES",
                defaults.scrape_interval_minutes,
            ),
            max_retries: env_u64("WEBTRAWL_MAX_RETRIES", defaults.max_retries as u64) as u32,
            concurrent_scrapers: env_u64(
                "WEBTRAWL_CONCURRENT_SCRAPERS",
                defaults.concurrent_scrapers as u64,
            ) as usize,
            nav_timeout: Duration::from_millis(env_u64(
                "WEBTRAWL_NAV_TIMEOUT_MS",
                defaults.nav_timeout.as_millis() as u64,
            )),
            wait_strategy: env_opt("WEBTRAWL_WAIT_STRATEGY")
                .and_then(|s| WaitStrategy::parse(&s))
                .unwrap_or(defaults.wait_strategy),
            disable_images: env_flag("WEBTRAWL_DISABLE_IMAGES", defaults.disable_images),
            disable_css: env_flag("WEBTRAWL_DISABLE_CSS", defaults.disable_css),
            dynamic_wait: Duration::from_millis(env_u64("WEBTRAWL_DYNAMIC_WAIT_MS", 0)),
            stale_timeout_minutes: env_i64(
                "WEBTRAWL_STALE_TIMEOUT_MINUTES",
                defaults.stale_timeout_minutes,
            ),
            sweep_interval: Duration::from_secs(
                env_u64("WEBTRAWL_SWEEP_INTERVAL_MINUTES", 10) * 60,
            ),
            message_ttl: Duration::from_secs(env_u64("WEBTRAWL_MESSAGE_TTL_MINUTES", 60) * 60),
            user_agent: env_str("WEBTRAWL_USER_AGENT", &defaults.user_agent),
            chromium_path: env_opt("WEBTRAWL_CHROMIUM_PATH").map(PathBuf::from),
            max_html_bytes: env_u64("WEBTRAWL_MAX_HTML_BYTES", defaults.max_html_bytes as u64)
                as usize,
        }
    }

    pub fn scrape_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.scrape_interval_minutes)
    }

    pub fn stale_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_timeout_minutes)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_str(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_opt(key)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scrape_interval_minutes, 60);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.concurrent_scrapers, 3);
        assert_eq!(cfg.nav_timeout, Duration::from_millis(15_000));
        assert_eq!(cfg.wait_strategy, WaitStrategy::Fast);
        assert!(cfg.disable_images);
        assert!(!cfg.disable_css);
        assert_eq!(cfg.dynamic_wait, Duration::ZERO);
        assert_eq!(cfg.stale_timeout_minutes, 120);
    }

    #[test]
    fn interval_helpers() {
        let cfg = Config::default();
        assert_eq!(cfg.scrape_interval(), chrono::Duration::minutes(60));
        assert_eq!(cfg.stale_timeout(), chrono::Duration::minutes(120));
    }
}

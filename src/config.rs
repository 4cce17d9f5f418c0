// src/config.rs
// All tunables for one watch cycle, threaded explicitly through the
// pipeline. No ambient singletons.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one detection cycle.
///
/// Defaults match the observed target site; every path and tunable can be
/// overridden through `WATCH_*` environment variables. The redirect-marker
/// and login-pattern sets are plain data because they are the most likely
/// point of future breakage on the target.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Page the monitor inspects.
    pub target_url: String,
    /// Origin used to resolve relative redirect targets.
    pub base_url: String,
    /// Marker element that proves the content page rendered.
    pub stream_selector: String,
    /// One element per content item.
    pub item_selector: String,

    /// Initial page navigation budget (DOM content loaded is enough).
    pub load_timeout: Duration,
    /// Grace period after navigation for client-side boot.
    pub settle_delay: Duration,
    /// Budget for a direct navigation decoded from the redirect marker.
    pub redirect_nav_timeout: Duration,
    /// Wait between redirect re-polls when the target cannot be decoded.
    pub redirect_backoff: Duration,
    /// Budget for the stream marker to appear once resolved.
    pub selector_timeout: Duration,
    /// Grace period after the marker appears, for item hydration.
    pub item_settle: Duration,

    /// Redirect re-poll attempts before the session is declared stuck.
    pub redirect_retries: u32,
    /// Newest items inspected per run.
    pub max_items: usize,
    /// Fingerprint history cap (FIFO eviction beyond this).
    pub store_cap: usize,
    /// Minimum hours between health pings.
    pub health_interval_hours: i64,

    pub store_path: PathBuf,
    pub health_path: PathBuf,
    pub session_path: PathBuf,
    pub screenshot_path: PathBuf,

    /// Query parameter names that flag a pending client-side redirect.
    pub redirect_markers: Vec<String>,
    /// Lowercase substrings of login/SSO provider URLs.
    pub login_patterns: Vec<String>,

    pub headless: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            target_url: "https://learning.westminster.ac.uk/ultra/stream".to_string(),
            base_url: "https://learning.westminster.ac.uk".to_string(),
            stream_selector: ".activity-stream".to_string(),
            item_selector: ".stream-item".to_string(),

            load_timeout: Duration::from_secs(90),
            settle_delay: Duration::from_secs(8),
            redirect_nav_timeout: Duration::from_secs(30),
            redirect_backoff: Duration::from_secs(15),
            selector_timeout: Duration::from_secs(60),
            item_settle: Duration::from_secs(3),

            redirect_retries: 3,
            max_items: 10,
            store_cap: 50,
            health_interval_hours: 24,

            store_path: PathBuf::from("seen_posts.json"),
            health_path: PathBuf::from("last_health_check.txt"),
            session_path: PathBuf::from("session_storage.json"),
            screenshot_path: PathBuf::from("error_screenshot.png"),

            redirect_markers: vec!["new_loc".to_string()],
            login_patterns: vec![
                "login".to_string(),
                "auth".to_string(),
                "microsoftonline".to_string(),
            ],

            headless: true,
        }
    }
}

impl WatchConfig {
    /// Defaults with `WATCH_*` environment overrides applied.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            target_url: env_or("WATCH_TARGET_URL", d.target_url),
            base_url: env_or("WATCH_BASE_URL", d.base_url),
            stream_selector: env_or("WATCH_STREAM_SELECTOR", d.stream_selector),
            item_selector: env_or("WATCH_ITEM_SELECTOR", d.item_selector),

            load_timeout: env_secs("WATCH_LOAD_TIMEOUT_SECS", d.load_timeout),
            settle_delay: env_secs("WATCH_SETTLE_SECS", d.settle_delay),
            redirect_nav_timeout: env_secs("WATCH_REDIRECT_NAV_TIMEOUT_SECS", d.redirect_nav_timeout),
            redirect_backoff: env_secs("WATCH_REDIRECT_BACKOFF_SECS", d.redirect_backoff),
            selector_timeout: env_secs("WATCH_SELECTOR_TIMEOUT_SECS", d.selector_timeout),
            item_settle: env_secs("WATCH_ITEM_SETTLE_SECS", d.item_settle),

            redirect_retries: env_or("WATCH_REDIRECT_RETRIES", d.redirect_retries),
            max_items: env_or("WATCH_MAX_ITEMS", d.max_items),
            store_cap: env_or("WATCH_STORE_CAP", d.store_cap),
            health_interval_hours: env_or("WATCH_HEALTH_INTERVAL_HOURS", d.health_interval_hours),

            store_path: env_or("WATCH_STORE_PATH", d.store_path),
            health_path: env_or("WATCH_HEALTH_PATH", d.health_path),
            session_path: env_or("WATCH_SESSION_PATH", d.session_path),
            screenshot_path: env_or("WATCH_SCREENSHOT_PATH", d.screenshot_path),

            redirect_markers: env_list("WATCH_REDIRECT_MARKERS", d.redirect_markers),
            login_patterns: env_list("WATCH_LOGIN_PATTERNS", d.login_patterns),

            headless: env_or("WATCH_HEADLESS", d.headless),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Comma-separated list override; empty entries are dropped.
fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => {
            let items: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                default
            } else {
                items
            }
        }
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = WatchConfig::default();
        assert_eq!(cfg.store_cap, 50);
        assert_eq!(cfg.max_items, 10);
        assert_eq!(cfg.redirect_retries, 3);
        assert!(cfg.target_url.starts_with(&cfg.base_url));
    }

    #[serial_test::serial]
    #[test]
    fn env_list_override_and_fallback() {
        std::env::set_var("WATCH_LOGIN_PATTERNS", "sso, idp ,");
        let cfg = WatchConfig::from_env();
        assert_eq!(cfg.login_patterns, vec!["sso".to_string(), "idp".to_string()]);
        std::env::remove_var("WATCH_LOGIN_PATTERNS");

        let cfg = WatchConfig::from_env();
        assert!(cfg.login_patterns.contains(&"microsoftonline".to_string()));
    }
}

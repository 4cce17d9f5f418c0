// src/browser.rs
// Headless Chrome lifecycle plus the narrow page capability the pipeline
// consumes. Everything above this module talks to `StreamPage`, so tests
// never need a real browser.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::WatchConfig;

/// The page operations the pipeline needs, and nothing more.
#[async_trait::async_trait]
pub trait StreamPage: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;
    /// Inner text of the first `max` elements matching `selector`, DOM order.
    async fn item_texts(&self, selector: &str, max: usize) -> Result<Vec<String>>;
    /// Best-effort no-op interaction to nudge client-side redirect logic.
    async fn nudge(&self);
    async fn screenshot(&self, path: &Path) -> Result<()>;
    async fn settle(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Portable authentication state produced by the out-of-scope login tool:
/// cookies plus per-origin localStorage, in the browser-automation
/// `storage_state` layout.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionBundle {
    #[serde(default)]
    pub cookies: Vec<BundleCookie>,
    #[serde(default)]
    pub origins: Vec<BundleOrigin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix seconds; -1 marks a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleOrigin {
    pub origin: String,
    #[serde(default, rename = "localStorage")]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

impl SessionBundle {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading session bundle {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing session bundle {}", path.display()))
    }

    fn cookie_params(&self) -> Vec<CookieParam> {
        let mut params = Vec::with_capacity(self.cookies.len());
        for c in &self.cookies {
            let mut builder = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone());
            if let Some(domain) = &c.domain {
                builder = builder.domain(domain.clone());
            }
            if let Some(path) = &c.path {
                builder = builder.path(path.clone());
            }
            builder = builder.secure(c.secure).http_only(c.http_only);
            if let Some(same_site) = c.same_site.as_deref().and_then(parse_same_site) {
                builder = builder.same_site(same_site);
            }
            if let Some(expires) = c.expires {
                if expires > 0.0 {
                    builder = builder.expires(TimeSinceEpoch::new(expires));
                }
            }
            match builder.build() {
                Ok(p) => params.push(p),
                Err(e) => warn!(cookie = %c.name, error = %e, "skipping malformed cookie"),
            }
        }
        params
    }
}

fn parse_same_site(s: &str) -> Option<CookieSameSite> {
    match s.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => Option::None,
    }
}

/// One launched Chrome instance with its CDP event-handler task.
/// The handler must be aborted and the temp profile removed on every
/// exit path, which `close` guarantees.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    pub async fn launch(cfg: &WatchConfig) -> Result<Self> {
        let chrome_path = find_browser_executable()?;
        let user_data_dir =
            std::env::temp_dir().join(format!("stream_watch_chrome_{}", std::process::id()));
        std::fs::create_dir_all(&user_data_dir).context("creating user data directory")?;

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .window_size(1920, 1080)
            .user_data_dir(user_data_dir.clone())
            .chrome_executable(chrome_path)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-background-networking")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-notifications")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg("--mute-audio");
        if cfg.headless {
            builder = builder.headless_mode(HeadlessMode::default());
        } else {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow!("building browser config: {e}"))?;

        info!("launching headless browser");
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("launching browser")?;

        let handler_task = task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
            debug!("browser event handler finished");
        });

        Ok(Self {
            browser,
            handler: handler_task,
            user_data_dir,
        })
    }

    /// Open a page with the bundle's cookies installed, ready to navigate
    /// as the authenticated user.
    pub async fn open_page(&self, bundle: &SessionBundle) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("creating page")?;

        let cookies = bundle.cookie_params();
        if !cookies.is_empty() {
            let count = cookies.len();
            page.set_cookies(cookies)
                .await
                .context("installing session cookies")?;
            info!(cookies = count, "session cookies installed");
        }

        Ok(ChromiumPage {
            page,
            origins: bundle.origins.clone(),
            storage_applied: AtomicBool::new(false),
        })
    }

    /// Tear down Chrome and its scratch profile. Called on every exit
    /// path of a run, success or failure.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(error = %e, "browser close request failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            warn!(path = %self.user_data_dir.display(), error = %e, "could not remove browser profile dir");
        }
        info!("browser closed");
    }
}

/// Find a Chrome/Chromium executable: `CHROMIUM_PATH` wins, then common
/// install locations, then `which` on unix.
fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(path = %path.display(), "using browser from CHROMIUM_PATH");
            return Ok(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points to a non-existent file");
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    };
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(path = %path.display(), "found browser");
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !found.is_empty() {
                        info!(path = %found, "found browser via which");
                        return Ok(PathBuf::from(found));
                    }
                }
            }
        }
    }

    Err(anyhow!(
        "no Chrome/Chromium executable found; set CHROMIUM_PATH"
    ))
}

/// Production `StreamPage` over a CDP page handle.
pub struct ChromiumPage {
    page: Page,
    origins: Vec<BundleOrigin>,
    storage_applied: AtomicBool,
}

impl ChromiumPage {
    /// Replay the bundle's localStorage for the current origin. Only
    /// possible once a real document is loaded, so this runs after the
    /// first successful navigation, once.
    async fn apply_local_storage(&self) {
        if self.storage_applied.swap(true, Ordering::SeqCst) {
            return;
        }
        let current = match self.page.url().await {
            Ok(Some(url)) => url,
            _ => return,
        };
        for origin in &self.origins {
            if !current.starts_with(&origin.origin) {
                continue;
            }
            let mut applied = 0usize;
            for entry in &origin.local_storage {
                let script = format!(
                    "window.localStorage.setItem({}, {})",
                    json_str(&entry.name),
                    json_str(&entry.value)
                );
                match self.page.evaluate(script.as_str()).await {
                    Ok(_) => applied += 1,
                    Err(e) => debug!(key = %entry.name, error = %e, "localStorage replay failed"),
                }
            }
            debug!(origin = %origin.origin, applied, "localStorage replayed");
        }
    }
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait::async_trait]
impl StreamPage for ChromiumPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation timeout after {}s", timeout.as_secs()))?
            .map_err(|e| anyhow!("navigation to {url} failed: {e}"))?;
        self.apply_local_storage().await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        match self.page.url().await {
            Ok(Some(url)) => Ok(url),
            // Not navigated yet; report something classifiable.
            Ok(None) => Ok("about:blank".to_string()),
            Err(e) => Err(anyhow!("reading page url: {e}")),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let probe = format!("document.querySelector({}) !== null", json_str(selector));
        let poll = Duration::from_millis(250);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(result) = self.page.evaluate(probe.as_str()).await {
                if result.into_value::<bool>().unwrap_or(false) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "selector {selector} timeout after {}s",
                    timeout.as_secs()
                ));
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn item_texts(&self, selector: &str, max: usize) -> Result<Vec<String>> {
        // One evaluate round-trip; zero matches is an empty array, never
        // an error.
        let script = format!(
            "Array.from(document.querySelectorAll({}), el => el.innerText || '').slice(0, {})",
            json_str(selector),
            max
        );
        let result = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|e| anyhow!("querying {selector}: {e}"))?;
        result
            .into_value::<Vec<String>>()
            .map_err(|e| anyhow!("reading item texts: {e}"))
    }

    async fn nudge(&self) {
        if let Ok(body) = self.page.find_element("body").await {
            let _ = body.click().await;
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            capture_beyond_viewport: Some(true),
            ..Default::default()
        };
        let data = self
            .page
            .screenshot(params)
            .await
            .map_err(|e| anyhow!("capturing screenshot: {e}"))?;
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("writing screenshot to {}", path.display()))
    }
}

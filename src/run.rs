// src/run.rs
// One full detection cycle. The single most important property here:
// the fingerprint store is written back exactly once, at the very end,
// no matter which earlier stage failed.

use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, SessionBundle, StreamPage};
use crate::config::WatchConfig;
use crate::dedup;
use crate::extract::{self, StreamItem};
use crate::fingerprint::FingerprintStore;
use crate::health::HealthCadence;
use crate::navigate;
use crate::notify::{messages, Notifier, TelegramNotifier};

/// Terminal failure kinds for a run, each with its own operator-facing
/// handling.
#[derive(Debug, Error)]
pub enum RunFailure {
    /// The session bundle file is absent; navigation is pointless.
    #[error("no session bundle at {path}")]
    PrerequisiteMissing { path: PathBuf },

    /// Login bounce, or a redirect page that never went away. Either
    /// way the stored session can no longer reach content.
    #[error("session expired (stuck_on_redirect: {stuck_on_redirect})")]
    SessionExpired { stuck_on_redirect: bool },

    /// The page resolved but the content marker never rendered.
    #[error("content not found: {reason}")]
    ContentNotFound { timeout: bool, reason: String },

    /// Notification transport failure surfaced from the test mode.
    #[error("notification transport failed: {0}")]
    Transport(String),

    /// Capability acquisition or other environment trouble. Logged,
    /// never alerted; the run still persists state.
    #[error("setup failed: {0}")]
    Setup(String),
}

/// Summary of what one cycle did.
#[derive(Debug, Default)]
pub struct RunReport {
    pub items_seen: usize,
    pub new_posts: usize,
    pub notified: usize,
    pub health_sent: bool,
    pub failure: Option<RunFailure>,
}

/// Run one detection cycle with the production Telegram transport.
pub async fn run_once(cfg: &WatchConfig) -> RunReport {
    let notifier = TelegramNotifier::from_env();
    if !notifier.is_configured() {
        warn!("TG_TOKEN / TG_CHAT_ID not set, notifications will fail");
    }
    run_once_with(cfg, &notifier).await
}

/// Run one detection cycle against an injected transport.
///
/// Stage order: load state, verify the session bundle exists, browse
/// (navigate -> extract), dedup & notify, then persist unconditionally.
/// Failures from the middle stages are classified and alerted here; none
/// of them can skip the final persistence step.
pub async fn run_once_with(cfg: &WatchConfig, notifier: &dyn Notifier) -> RunReport {
    // State loads first so there is always something to write back.
    let mut store = FingerprintStore::load(&cfg.store_path, cfg.store_cap).await;
    let mut health = HealthCadence::load(&cfg.health_path, cfg.health_interval_hours).await;
    let mut report = RunReport::default();

    if !cfg.session_path.exists() {
        let failure = RunFailure::PrerequisiteMissing {
            path: cfg.session_path.clone(),
        };
        warn!(%failure, "prerequisite check failed");
        dispatch_alert(&failure, cfg, notifier).await;
        report.failure = Some(failure);
    } else {
        match browse(cfg).await {
            Ok(items) => {
                report.items_seen = items.len();
                let outcome =
                    dedup::process(&items, &mut store, &mut health, notifier, Utc::now()).await;
                report.new_posts = outcome.new_posts;
                report.notified = outcome.notified;
                report.health_sent = outcome.health_sent;
            }
            Err(failure) => {
                warn!(%failure, "run failed");
                dispatch_alert(&failure, cfg, notifier).await;
                report.failure = Some(failure);
            }
        }
    }

    // Persist no matter what happened above.
    if let Err(e) = store.save(&cfg.store_path).await {
        warn!(error = %e, "failed to persist fingerprint store");
    }
    if health.is_dirty() {
        if let Err(e) = health.save(&cfg.health_path).await {
            warn!(error = %e, "failed to persist health marker");
        }
    }

    info!(
        items = report.items_seen,
        new = report.new_posts,
        notified = report.notified,
        failed = report.failure.is_some(),
        "cycle complete"
    );
    report
}

/// The browser-bound half of the cycle. The session is closed on every
/// path out of here, and a diagnostic screenshot is attempted before the
/// page goes away on session/content failures.
async fn browse(cfg: &WatchConfig) -> Result<Vec<StreamItem>, RunFailure> {
    let bundle = SessionBundle::load(&cfg.session_path)
        .await
        .map_err(|e| RunFailure::Setup(format!("session bundle: {e:#}")))?;

    let session = BrowserSession::launch(cfg)
        .await
        .map_err(|e| RunFailure::Setup(format!("browser launch: {e:#}")))?;

    let result = async {
        let page = session
            .open_page(&bundle)
            .await
            .map_err(|e| RunFailure::Setup(format!("page setup: {e:#}")))?;

        match navigate::resolve(&page, cfg).await {
            Ok(state) => {
                debug!(url = %state.url, "extracting items");
            }
            Err(failure) => {
                if matches!(
                    failure,
                    RunFailure::SessionExpired { .. } | RunFailure::ContentNotFound { .. }
                ) {
                    match page.screenshot(&cfg.screenshot_path).await {
                        Ok(()) => info!(path = %cfg.screenshot_path.display(), "diagnostic screenshot saved"),
                        Err(e) => debug!(error = %e, "screenshot failed"),
                    }
                }
                return Err(failure);
            }
        }

        extract::extract(&page, cfg)
            .await
            .map_err(|e| RunFailure::Setup(format!("item extraction: {e:#}")))
    }
    .await;

    session.close().await;
    result
}

/// One operator alert per classified failure kind per run. Routine and
/// environment-shaped failures stay in the logs.
async fn dispatch_alert(failure: &RunFailure, cfg: &WatchConfig, notifier: &dyn Notifier) {
    let session_file = cfg.session_path.display().to_string();
    let text = match failure {
        RunFailure::PrerequisiteMissing { .. } => Some(messages::no_session(&session_file)),
        RunFailure::SessionExpired {
            stuck_on_redirect: false,
        } => Some(messages::session_expired(&session_file)),
        RunFailure::SessionExpired {
            stuck_on_redirect: true,
        } => Some(messages::stuck_on_redirect(&session_file)),
        // Alert only when the marker wait actually timed out; transient
        // rendering hiccups would train the operator to ignore alerts.
        RunFailure::ContentNotFound { timeout: true, .. } => Some(messages::stream_timeout()),
        RunFailure::ContentNotFound { timeout: false, .. } => None,
        RunFailure::Transport(_) | RunFailure::Setup(_) => None,
    };

    if let Some(text) = text {
        if let Err(e) = notifier.send(&text).await {
            warn!(error = %e, "operator alert could not be delivered");
        }
    }
}

// src/navigate.rs
// Drives the browser through load / redirect / auth-failure detection
// until the content page is reached or the session is declared dead.
//
// Redirect resolution is bounded and kept distinct from auth failure:
// a pending redirect may heal by waiting, an SSO bounce never will, and
// the two demand different operator responses.

use tracing::{debug, info, warn};

use crate::browser::StreamPage;
use crate::config::WatchConfig;
use crate::run::RunFailure;

/// Classification of the page the browser currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePhase {
    Loading,
    RedirectPending,
    AuthExpired,
    Resolved,
    Failed,
}

/// The resolver's working value: where we are and what that means.
#[derive(Debug, Clone)]
pub struct PageState {
    pub url: String,
    pub phase: PagePhase,
}

/// Pure URL classification, testable without a browser.
///
/// Login patterns win over redirect markers: an SSO URL that also carries
/// a redirect parameter is still an expired session.
pub fn classify(url: &str, cfg: &WatchConfig) -> PagePhase {
    let lower = url.to_ascii_lowercase();
    if cfg.login_patterns.iter().any(|p| lower.contains(p.as_str())) {
        return PagePhase::AuthExpired;
    }
    if cfg
        .redirect_markers
        .iter()
        .any(|m| url.contains(&format!("{m}=")))
    {
        return PagePhase::RedirectPending;
    }
    PagePhase::Resolved
}

/// Decode the intended destination out of a redirect-marker parameter.
/// Relative targets resolve against the configured base origin.
pub fn decode_redirect_target(url: &str, cfg: &WatchConfig) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    for (key, value) in parsed.query_pairs() {
        if cfg.redirect_markers.iter().any(|m| m == key.as_ref()) {
            if value.starts_with("http://") || value.starts_with("https://") {
                return Some(value.into_owned());
            }
            return Some(format!(
                "{}{}",
                cfg.base_url.trim_end_matches('/'),
                value
            ));
        }
    }
    None
}

/// Resolve the target page to a stable `Resolved` state.
///
/// Terminal failures are classified: an SSO bounce or an exhausted
/// redirect budget both mean the stored session can no longer reach
/// content; a missing content marker is a separate, softer failure.
pub async fn resolve(
    page: &dyn StreamPage,
    cfg: &WatchConfig,
) -> Result<PageState, RunFailure> {
    info!(url = %cfg.target_url, "navigating to stream");
    page.navigate(&cfg.target_url, cfg.load_timeout)
        .await
        .map_err(|e| RunFailure::Setup(format!("initial navigation: {e}")))?;
    page.settle(cfg.settle_delay).await;

    let mut state = PageState {
        url: cfg.target_url.clone(),
        phase: PagePhase::Loading,
    };

    let mut attempt = 0u32;
    loop {
        state.url = page
            .current_url()
            .await
            .map_err(|e| RunFailure::Setup(format!("reading page url: {e}")))?;
        state.phase = classify(&state.url, cfg);
        debug!(url = %state.url, phase = ?state.phase, attempt, "page classified");

        match state.phase {
            PagePhase::Resolved => break,
            PagePhase::AuthExpired => {
                // No retries: a session bounced to the login provider
                // cannot self-heal, so burning the budget only delays
                // the operator alert.
                warn!(url = %state.url, "login page detected, session expired");
                return Err(RunFailure::SessionExpired {
                    stuck_on_redirect: false,
                });
            }
            PagePhase::RedirectPending => {
                attempt += 1;
                if attempt >= cfg.redirect_retries {
                    state.phase = PagePhase::Failed;
                    warn!(url = %state.url, "still on redirect page after {attempt} attempts");
                    return Err(RunFailure::SessionExpired {
                        stuck_on_redirect: true,
                    });
                }
                info!(attempt, max = cfg.redirect_retries, "redirect pending, trying to advance");
                if let Some(target) = decode_redirect_target(&state.url, cfg) {
                    debug!(target = %target, "navigating directly to decoded redirect target");
                    if page.navigate(&target, cfg.redirect_nav_timeout).await.is_ok() {
                        page.settle(cfg.item_settle).await;
                        continue;
                    }
                    debug!("direct navigation failed, falling back to backoff");
                }
                // Target not decodable: give client-side redirect logic
                // time, then nudge it with a no-op interaction.
                page.settle(cfg.redirect_backoff).await;
                page.nudge().await;
            }
            PagePhase::Loading | PagePhase::Failed => unreachable!("classify never yields {:?}", state.phase),
        }
    }

    // The URL looks right; now the content marker has to actually render.
    if let Err(e) = page
        .wait_for_selector(&cfg.stream_selector, cfg.selector_timeout)
        .await
    {
        let reason = e.to_string();
        state.phase = PagePhase::Failed;
        warn!(url = %state.url, reason = %reason, "content marker never appeared");
        return Err(RunFailure::ContentNotFound {
            timeout: reason.to_ascii_lowercase().contains("timeout"),
            reason,
        });
    }
    // Items hydrate a beat after the marker.
    page.settle(cfg.item_settle).await;

    info!(url = %state.url, "stream page resolved");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> WatchConfig {
        WatchConfig::default()
    }

    #[test]
    fn plain_stream_url_is_resolved() {
        assert_eq!(
            classify("https://learning.westminster.ac.uk/ultra/stream", &cfg()),
            PagePhase::Resolved
        );
    }

    #[test]
    fn redirect_marker_is_pending() {
        assert_eq!(
            classify(
                "https://learning.westminster.ac.uk/?new_loc=%2Fultra%2Fstream",
                &cfg()
            ),
            PagePhase::RedirectPending
        );
    }

    #[test]
    fn login_urls_expire_case_insensitively() {
        assert_eq!(
            classify("https://login.microsoftonline.com/common/oauth2", &cfg()),
            PagePhase::AuthExpired
        );
        assert_eq!(
            classify("https://idp.example.ac.uk/LOGIN?return=x", &cfg()),
            PagePhase::AuthExpired
        );
    }

    #[test]
    fn login_pattern_beats_redirect_marker() {
        assert_eq!(
            classify(
                "https://login.microsoftonline.com/?new_loc=%2Fultra%2Fstream",
                &cfg()
            ),
            PagePhase::AuthExpired
        );
    }

    #[test]
    fn decode_resolves_relative_target_against_base() {
        let url = "https://learning.westminster.ac.uk/?new_loc=%2Fultra%2Fstream";
        assert_eq!(
            decode_redirect_target(url, &cfg()).as_deref(),
            Some("https://learning.westminster.ac.uk/ultra/stream")
        );
    }

    #[test]
    fn decode_passes_absolute_target_through() {
        let url = "https://learning.westminster.ac.uk/?new_loc=https%3A%2F%2Fother.example%2Fx";
        assert_eq!(
            decode_redirect_target(url, &cfg()).as_deref(),
            Some("https://other.example/x")
        );
    }

    #[test]
    fn decode_without_marker_is_none() {
        assert!(decode_redirect_target(
            "https://learning.westminster.ac.uk/ultra/stream",
            &cfg()
        )
        .is_none());
    }
}

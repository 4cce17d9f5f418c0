// src/dedup.rs
// Decides which extracted records are new, dispatches notifications for
// them, and evaluates the health-ping cadence. Dispatch failures are
// logged and swallowed: a flaky transport must not abort the remaining
// records or block persistence of "already seen".

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::extract::StreamItem;
use crate::fingerprint::{Fingerprint, FingerprintStore};
use crate::health::HealthCadence;
use crate::notify::{messages, Notifier};

/// What one dedup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Records whose fingerprint was absent from the run-start snapshot.
    pub new_posts: usize,
    /// New records whose notification actually went out.
    pub notified: usize,
    pub health_sent: bool,
}

/// Process one run's records against the persisted watermark.
///
/// Newness is judged against the store snapshot taken here, at the start
/// of the pass; fingerprints are appended whether or not their
/// notification succeeded (at-least-once, never a re-notification storm).
pub async fn process(
    items: &[StreamItem],
    store: &mut FingerprintStore,
    health: &mut HealthCadence,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> DedupOutcome {
    let snapshot = store.snapshot();
    let mut outcome = DedupOutcome::default();

    for item in items {
        let fp = Fingerprint::of_text(&item.text);
        if snapshot.contains(&fp) {
            debug!(title = item.title(), "already seen");
            continue;
        }
        outcome.new_posts += 1;

        match notifier.send(&messages::new_post(item.title(), now)).await {
            Ok(()) => outcome.notified += 1,
            Err(e) => {
                warn!(error = %e, title = item.title(), "notification dispatch failed");
            }
        }
        // Recorded as seen regardless of dispatch outcome.
        store.insert(fp);
    }

    if health.is_due(now) {
        match notifier.send(&messages::health(store.len(), now)).await {
            Ok(()) => {
                health.record(now);
                outcome.health_sent = true;
                info!("health ping sent");
            }
            Err(e) => warn!(error = %e, "health ping failed, will retry next run"),
        }
    }

    info!(
        checked = items.len(),
        new = outcome.new_posts,
        notified = outcome.notified,
        "dedup pass complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(vec![]),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: Mutex::new(vec![]),
                fail: true,
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(anyhow!("transport down"));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn item(text: &str) -> StreamItem {
        StreamItem {
            text: text.to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn transport_failure_still_marks_seen() {
        let notifier = RecordingNotifier::failing();
        let mut store = FingerprintStore::with_cap(50);
        let mut health = HealthCadence::new(24);

        let items = vec![item("Assignment A\nbody")];
        let out = process(&items, &mut store, &mut health, &notifier, now()).await;

        assert_eq!(out.new_posts, 1);
        assert_eq!(out.notified, 0);
        assert!(store.contains(&Fingerprint::of_text("Assignment A\nbody")));
        // Failed health ping must not advance the cadence either.
        assert!(!out.health_sent);
        assert!(health.is_due(now()));
    }

    #[tokio::test]
    async fn health_ping_respects_cadence_and_reports_store_size() {
        let notifier = RecordingNotifier::new();
        let mut store = FingerprintStore::with_cap(50);
        let mut health = HealthCadence::new(24);

        let items = vec![item("Assignment A\nbody")];
        let out = process(&items, &mut store, &mut health, &notifier, now()).await;
        assert!(out.health_sent);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("Tracking 1 posts"));

        // Same interval, nothing new: no second ping.
        let out2 = process(&items, &mut store, &mut health, &notifier, now()).await;
        assert!(!out2.health_sent);
        assert_eq!(notifier.sent().len(), 2);
    }
}

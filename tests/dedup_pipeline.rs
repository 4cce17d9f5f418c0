// tests/dedup_pipeline.rs
// The dedup engine's contract: snapshot-based newness, at-least-once
// notification, idempotent re-processing, and the 50-entry FIFO cap
// across simulated runs.

use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use stream_watch::dedup::process;
use stream_watch::extract::StreamItem;
use stream_watch::health::HealthCadence;
use stream_watch::notify::Notifier;
use stream_watch::{Fingerprint, FingerprintStore};

struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            sent: Mutex::new(vec![]),
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn posts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.contains("New stream post"))
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
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

/// Cadence that is never due, so post notifications can be counted alone.
fn quiet_health() -> HealthCadence {
    let mut h = HealthCadence::new(24);
    h.record(now());
    h
}

#[tokio::test]
async fn empty_store_notifies_every_record_in_order() {
    let notifier = RecordingNotifier::new();
    let mut store = FingerprintStore::with_cap(50);
    let mut health = quiet_health();

    let items = vec![item("Assignment A\ndetails"), item("Assignment B\ndetails")];
    let out = process(&items, &mut store, &mut health, &notifier, now()).await;

    assert_eq!(out.new_posts, 2);
    assert_eq!(out.notified, 2);
    let posts = notifier.posts();
    assert!(posts[0].contains("Assignment A"));
    assert!(posts[1].contains("Assignment B"));

    assert_eq!(store.len(), 2);
    assert!(store.contains(&Fingerprint::of_text("Assignment A\ndetails")));
    assert!(store.contains(&Fingerprint::of_text("Assignment B\ndetails")));
}

#[tokio::test]
async fn known_fingerprints_are_suppressed() {
    let notifier = RecordingNotifier::new();
    let mut store = FingerprintStore::with_cap(50);
    store.insert(Fingerprint::of_text("Assignment A\ndetails"));
    let mut health = quiet_health();

    let items = vec![item("Assignment A\ndetails"), item("Assignment B\ndetails")];
    let out = process(&items, &mut store, &mut health, &notifier, now()).await;

    assert_eq!(out.new_posts, 1);
    let posts = notifier.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("Assignment B"));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn reprocessing_the_same_records_is_idempotent() {
    let notifier = RecordingNotifier::new();
    let mut store = FingerprintStore::with_cap(50);
    let mut health = quiet_health();

    let items = vec![item("Assignment A\ndetails"), item("Assignment B\ndetails")];
    process(&items, &mut store, &mut health, &notifier, now()).await;
    let second = process(&items, &mut store, &mut health, &notifier, now()).await;

    assert_eq!(second.new_posts, 0);
    assert_eq!(notifier.posts().len(), 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn content_change_inside_an_item_counts_as_new() {
    let notifier = RecordingNotifier::new();
    let mut store = FingerprintStore::with_cap(50);
    let mut health = quiet_health();

    process(
        &[item("Assignment A\ndue Friday")],
        &mut store,
        &mut health,
        &notifier,
        now(),
    )
    .await;
    // Same title, edited body: full-text fingerprinting must fire again.
    let out = process(
        &[item("Assignment A\ndue Monday")],
        &mut store,
        &mut health,
        &notifier,
        now(),
    )
    .await;

    assert_eq!(out.new_posts, 1);
    assert_eq!(notifier.posts().len(), 2);
}

#[tokio::test]
async fn history_cap_holds_across_simulated_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen_posts.json");
    let notifier = RecordingNotifier::new();

    // Fill the store to its cap over a first run.
    let mut store = FingerprintStore::load(&path, 50).await;
    let mut health = quiet_health();
    let batch: Vec<StreamItem> = (0..50).map(|i| item(&format!("post {i}\nbody"))).collect();
    for chunk in batch.chunks(10) {
        process(chunk, &mut store, &mut health, &notifier, now()).await;
    }
    store.save(&path).await.unwrap();

    // Next run: one genuinely new record arrives.
    let mut store = FingerprintStore::load(&path, 50).await;
    assert_eq!(store.len(), 50);
    process(
        &[item("the newcomer\nbody")],
        &mut store,
        &mut health,
        &notifier,
        now(),
    )
    .await;
    store.save(&path).await.unwrap();

    let reloaded = FingerprintStore::load(&path, 50).await;
    assert_eq!(reloaded.len(), 50);
    assert!(reloaded.contains(&Fingerprint::of_text("the newcomer\nbody")));
    assert!(!reloaded.contains(&Fingerprint::of_text("post 0\nbody")));
    assert!(reloaded.contains(&Fingerprint::of_text("post 1\nbody")));
}

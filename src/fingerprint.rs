// src/fingerprint.rs
// Content fingerprints and the bounded, persisted history of posts
// already notified. The history file is the watermark separating
// "already handled" from "new" across independent cold-start runs.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

/// Content-derived dedup key: hex SHA-256 of a record's normalized text.
///
/// Identity is content-based, not positional. Two records with identical
/// visible text collide by design.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Insertion-ordered fingerprint history, capped at `cap` entries.
///
/// Loaded at run start, appended to during the run, truncated and written
/// back at run end regardless of how the run went. Oldest entries are
/// evicted first once the cap is exceeded.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    seen: Vec<Fingerprint>,
    cap: usize,
}

impl FingerprintStore {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            seen: Vec::new(),
            cap,
        }
    }

    /// Load the history file. A missing file is a normal first run and
    /// yields an empty store; an unreadable or unparsable file is logged
    /// and also yields an empty store so the run can proceed.
    pub async fn load(path: &Path, cap: usize) -> Self {
        let seen = match fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<Vec<Fingerprint>>(&raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "fingerprint store unparsable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        tracing::debug!(entries = seen.len(), "fingerprint store loaded");
        Self { seen, cap }
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.seen.contains(fp)
    }

    /// Append; newest entries live at the tail.
    pub fn insert(&mut self, fp: Fingerprint) {
        self.seen.push(fp);
    }

    /// Run-start view used for newness checks, so fingerprints inserted
    /// during the run never suppress later records of the same run.
    pub fn snapshot(&self) -> HashSet<Fingerprint> {
        self.seen.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Persist the newest `cap` entries as a JSON array of digest strings.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let start = self.seen.len().saturating_sub(self.cap);
        let body = serde_json::to_vec_pretty(&self.seen[start..]).context("encoding fingerprint store")?;
        fs::write(path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(entries = self.seen.len().min(self.cap), "fingerprint store persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_fingerprint() {
        let a = Fingerprint::of_text("Assignment A\ndue Friday");
        let b = Fingerprint::of_text("Assignment A\ndue Friday");
        let c = Fingerprint::of_text("Assignment A\ndue Monday");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn snapshot_is_run_start_view() {
        let mut store = FingerprintStore::with_cap(50);
        store.insert(Fingerprint::of_text("old"));
        let snap = store.snapshot();
        store.insert(Fingerprint::of_text("new"));
        assert!(snap.contains(&Fingerprint::of_text("old")));
        assert!(!snap.contains(&Fingerprint::of_text("new")));
    }

    #[tokio::test]
    async fn save_caps_and_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut store = FingerprintStore::with_cap(50);
        for i in 0..50 {
            store.insert(Fingerprint::of_text(&format!("post {i}")));
        }
        store.insert(Fingerprint::of_text("the newcomer"));
        store.save(&path).await.unwrap();

        let reloaded = FingerprintStore::load(&path, 50).await;
        assert_eq!(reloaded.len(), 50);
        // Oldest original entry gone, newcomer present.
        assert!(!reloaded.contains(&Fingerprint::of_text("post 0")));
        assert!(reloaded.contains(&Fingerprint::of_text("post 1")));
        assert!(reloaded.contains(&Fingerprint::of_text("the newcomer")));
    }

    #[tokio::test]
    async fn missing_and_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(FingerprintStore::load(&missing, 50).await.is_empty());

        let corrupt = dir.path().join("bad.json");
        tokio::fs::write(&corrupt, b"{ not json").await.unwrap();
        assert!(FingerprintStore::load(&corrupt, 50).await.is_empty());
    }
}

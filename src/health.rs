// src/health.rs
// Cooldown gate for periodic "still alive" pings.
// - First ping ever is always due.
// - Inside the interval, pings are suppressed.
// - State advances explicitly via `record` after a successful send.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use tokio::fs;

/// Rolling-interval tracker for health notifications, persisted as a
/// single RFC 3339 timestamp. The previous format was a bare
/// `YYYY-MM-DD` day marker; those still parse (as midnight UTC) so an
/// upgrade cannot double-send.
#[derive(Debug, Clone)]
pub struct HealthCadence {
    interval: ChronoDuration,
    last_sent: Option<DateTime<Utc>>,
    dirty: bool,
}

impl HealthCadence {
    /// `interval_hours` <= 0 is treated as 0 (ping every run).
    pub fn new(interval_hours: i64) -> Self {
        Self {
            interval: ChronoDuration::hours(interval_hours.max(0)),
            last_sent: None,
            dirty: false,
        }
    }

    pub async fn load(path: &Path, interval_hours: i64) -> Self {
        let mut cadence = Self::new(interval_hours);
        if let Ok(raw) = fs::read_to_string(path).await {
            let raw = raw.trim();
            if !raw.is_empty() {
                match parse_marker(raw) {
                    Some(ts) => cadence.last_sent = Some(ts),
                    None => {
                        tracing::warn!(path = %path.display(), marker = raw, "unreadable health marker, treating as never sent");
                    }
                }
            }
        }
        cadence
    }

    /// Check without mutating: is a health ping allowed at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.interval,
        }
    }

    /// Record a successful dispatch at `now`.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_sent = Some(now);
        self.dirty = true;
    }

    /// True when the marker changed this run and needs writing back.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        self.last_sent
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let Some(last) = self.last_sent else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        fs::write(path, last.to_rfc3339())
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

fn parse_marker(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Legacy day marker, e.g. "2024-03-18".
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

// src/extract.rs
// Reads the resolved page's item list into normalized text records.
// Never mutates page state; zero items is a normal outcome, not an error.

use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::browser::StreamPage;
use crate::config::WatchConfig;

/// One content item as extracted from the page, newest first.
/// Ephemeral: lives only within a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamItem {
    /// Normalized full text; line structure is preserved.
    pub text: String,
}

impl StreamItem {
    /// The item's first line doubles as its title in notifications.
    pub fn title(&self) -> &str {
        self.text.lines().next().unwrap_or("")
    }
}

/// Normalize a multi-line text block: collapse runs of spaces and tabs
/// inside each line, trim the lines, and drop empty ones. Newlines are
/// kept because the first line is the record's title.
pub fn normalize_block(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());

    s.lines()
        .map(|line| re_ws.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull up to `max_items` records off the resolved page, most recent
/// first (DOM order on the target stream).
pub async fn extract(page: &dyn StreamPage, cfg: &WatchConfig) -> Result<Vec<StreamItem>> {
    let texts = page.item_texts(&cfg.item_selector, cfg.max_items).await?;
    let items: Vec<StreamItem> = texts
        .into_iter()
        .map(|t| normalize_block(&t))
        .filter(|t| !t.is_empty())
        .map(|text| StreamItem { text })
        .collect();
    tracing::info!(items = items.len(), "stream items extracted");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_within_lines_but_keeps_structure() {
        let raw = "  Assignment   A \n\n   due \t Friday  \n";
        assert_eq!(normalize_block(raw), "Assignment A\ndue Friday");
    }

    #[test]
    fn title_is_first_line() {
        let item = StreamItem {
            text: normalize_block("New announcement\nModule 5LI...\nposted today"),
        };
        assert_eq!(item.title(), "New announcement");

        let empty = StreamItem { text: String::new() };
        assert_eq!(empty.title(), "");
    }
}

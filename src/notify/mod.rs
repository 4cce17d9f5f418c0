pub mod telegram;

pub use telegram::TelegramNotifier;

use anyhow::Result;

/// Outbound notification transport: fire one text message at the chat.
/// Object-safe so tests can swap in a recorder.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Canned message bodies. The transport's markup subset is Telegram
/// Markdown, so `*bold*` below is intentional.
pub mod messages {
    use chrono::{DateTime, Utc};

    pub fn new_post(title: &str, now: DateTime<Utc>) -> String {
        format!(
            "\u{1F4E2} *New stream post:*\n{title}\n\u{1F550} {}",
            now.format("%Y-%m-%d %H:%M UTC")
        )
    }

    pub fn transport_test() -> String {
        "\u{2705} *Stream Watch test*\nTelegram transport is configured correctly.".to_string()
    }

    pub fn no_session(session_file: &str) -> String {
        format!(
            "\u{26A0}\u{FE0F} *Stream Watch alert*\n\n\u{274C} No session bundle found.\n\nRun the login tool and deploy a fresh `{session_file}`."
        )
    }

    pub fn session_expired(session_file: &str) -> String {
        format!(
            "\u{26A0}\u{FE0F} *Stream Watch alert*\n\n\u{1F510} The stored session has *expired*.\n\nRefresh it:\n1. Run the login tool locally\n2. Deploy the new `{session_file}`"
        )
    }

    pub fn stuck_on_redirect(session_file: &str) -> String {
        format!(
            "\u{26A0}\u{FE0F} *Stream Watch alert*\n\n\u{1F510} Stuck on the redirect page - the session is likely *expired*.\n\nRefresh it:\n1. Run the login tool locally\n2. Deploy the new `{session_file}`"
        )
    }

    pub fn stream_timeout() -> String {
        "\u{26A0}\u{FE0F} *Stream Watch alert*\n\n\u{274C} The activity stream did not load (timeout).\n\nPossible causes:\n\u{2022} Session expired\n\u{2022} The site is slow or down\n\nIf this persists, refresh the session.".to_string()
    }

    pub fn health(tracked_posts: usize, now: DateTime<Utc>) -> String {
        format!(
            "\u{1F49A} *Stream Watch health check*\n\n\u{2705} Monitor is running normally\n\u{1F4CA} Tracking {tracked_posts} posts\n\u{1F550} {}",
            now.format("%Y-%m-%d %H:%M UTC")
        )
    }

}

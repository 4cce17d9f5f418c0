//! Stream Watch — Binary Entrypoint
//! Runs one detection cycle against the configured activity stream, or a
//! one-shot transport check with `--test`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stream_watch::notify::{messages, Notifier};
use stream_watch::run::RunFailure;
use stream_watch::{run_once, TelegramNotifier, WatchConfig};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stream_watch=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = WatchConfig::from_env();

    if std::env::args().any(|a| a == "--test") {
        return transport_check().await;
    }

    let report = run_once(&cfg).await;

    // Classified failures are operational states, already alerted and
    // persisted; only environment trouble should flip the exit code so
    // the external scheduler notices.
    if let Some(RunFailure::Setup(msg)) = &report.failure {
        anyhow::bail!("setup failure: {msg}");
    }
    Ok(())
}

/// Verify the Telegram configuration end to end, no browser involved.
async fn transport_check() -> anyhow::Result<()> {
    println!("Testing Telegram connection...");
    let notifier = TelegramNotifier::from_env();
    match notifier.send(&messages::transport_test()).await {
        Ok(()) => {
            println!("Test message sent successfully! Check your Telegram.");
            Ok(())
        }
        Err(e) => {
            let failure = RunFailure::Transport(format!("{e:#}"));
            println!("Failed to send test message. Check your TG_TOKEN and TG_CHAT_ID.");
            Err(failure.into())
        }
    }
}

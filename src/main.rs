//! keydesk - VPN key desk bot
//!
//! Reads chat events as JSON lines on stdin and writes replies as JSON lines
//! on stdout. Logs go to stderr.

use keydesk::bot::{key_dialog, KeyDialog};
use keydesk::config::Config;
use keydesk::demux::Demultiplexer;
use keydesk::inventory::Inventory;
use keydesk::keys::{KeyBackend, OutlineKeys};
use keydesk::session::{ChatEvent, ChatMeta, DialogWorker, OutboundSink};
use keydesk::transport::{JsonLinesSink, JsonLinesSource};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keydesk=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;

    // Fail fast on a broken inventory; it is re-read on every use afterwards
    let inventory = Inventory::load(&config.inventory_file).await?;
    tracing::info!(
        path = %config.inventory_file.display(),
        servers = inventory.servers().len(),
        "inventory loaded"
    );

    let keys: Arc<dyn KeyBackend> = Arc::new(OutlineKeys::new(
        config.inventory_file.clone(),
        config.outline_settings(),
    ));
    let machine = Arc::new(key_dialog()?);
    let sink: Arc<dyn OutboundSink<ChatMeta>> = Arc::new(JsonLinesSink::new(tokio::io::stdout()));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                shutdown.cancel();
            }
        }
    });

    let worker = DialogWorker::new(machine, sink, KeyDialog::factory(keys))
        .with_idle_timeout(config.idle_timeout)
        .with_shutdown(shutdown.clone());

    let source = JsonLinesSource::blocking(std::io::BufReader::new(std::io::stdin()))?;
    let report = Demultiplexer::new(|e: &ChatEvent| e.chat_id, ChatMeta::from_event, worker)
        .with_shutdown(shutdown)
        .run(source)
        .await?;

    tracing::info!(
        events = report.events_routed,
        sessions = report.sessions_started,
        failed = report.sessions_failed,
        dropped = report.events_dropped,
        "keydesk stopped"
    );
    Ok(())
}

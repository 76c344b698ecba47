//! Dispatcher wiring and process lifecycle.

use crate::bot::handlers::{handle_command, handle_relay, Command};
use crate::bot::TelegramPipeline;
use crate::config::RoutingPolicy;
use crate::media::{ConversionEngine, TelegramMediaSource};
use crate::relay::{RelayPipeline, TelegramRelaySink};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Update tree: `/ping` replies directly, every other message goes to the
/// relay.
#[must_use]
pub fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_relay))
}

/// Build the Telegram-backed pipeline for `policy`.
pub async fn build_pipeline(bot: &Bot, policy: Arc<RoutingPolicy>) -> TelegramPipeline {
    let engine = ConversionEngine::from_policy(&policy);
    if !engine.probe().await {
        warn!(
            decoder = %policy.decoder.display(),
            "Frame extraction unavailable; only static stickers will be relayed"
        );
    }
    RelayPipeline::new(
        TelegramMediaSource::new(bot.clone(), policy.max_input_bytes),
        engine,
        TelegramRelaySink::new(bot.clone()),
        policy,
    )
}

/// Run the relay until SIGINT or SIGTERM, then drain in-flight jobs.
pub async fn run(bot: Bot, policy: Arc<RoutingPolicy>) {
    let pipeline = Arc::new(build_pipeline(&bot, policy.clone()).await);
    let tracker = TaskTracker::new();

    info!(
        destination = policy.destination,
        allowlist = policy.allowlist.len(),
        max_frame_width = policy.max_frame_width,
        "Relay is running..."
    );

    let mut dispatcher = Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![pipeline, tracker.clone()])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        match shutdown.shutdown() {
            Ok(stopped) => stopped.await,
            Err(e) => warn!("Dispatcher was not running at shutdown: {e}"),
        }
    });

    dispatcher.dispatch().await;

    tracker.close();
    if !tracker.is_empty() {
        info!(in_flight = tracker.len(), "Waiting for in-flight relay jobs");
    }
    tracker.wait().await;
    info!("Relay stopped.");
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

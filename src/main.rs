use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};

use meridian_notification_client::config::Settings;
use meridian_notification_client::metrics::encode_metrics;
use meridian_notification_client::notification::{
    create_notifier, MountOutcome, NotificationBridge,
};
use meridian_notification_client::refetch::{RefetchBroadcaster, RefetchRequest};
use meridian_notification_client::telemetry::init_telemetry;
use meridian_notification_client::token::FileTokenStore;
use meridian_notification_client::websocket::WsConnector;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel, settings.log_format)?;
    tracing::info!(endpoint = %settings.endpoint.base_url(), "Configuration loaded");

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let tokens = Arc::new(FileTokenStore::new(settings.token.store_path.clone()));
    tracing::info!(store = %tokens.path().display(), "Watching session token store");
    let quotes = Arc::new(RefetchBroadcaster::new(
        settings.quotes.status.clone(),
        settings.channel_buffer,
    ));
    let notifier = create_notifier(&settings.notification);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Stand-in for the host application's quotes cache
    let refetch_handle = tokio::spawn(log_refetches(quotes.subscribe(), shutdown_rx.clone()));

    let mut bridge = NotificationBridge::new(
        &settings,
        Arc::new(WsConnector::new()),
        tokens,
        quotes.clone(),
        notifier,
    );

    let poll_period = Duration::from_secs(settings.token.poll_interval.max(1));
    let mut token_poll = interval(poll_period);
    token_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal_handler(shutdown_tx);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = token_poll.tick() => match bridge.mount() {
                MountOutcome::Connected => tracing::info!("Notification bridge mounted"),
                MountOutcome::NoToken => tracing::debug!("No session token, waiting for login"),
                MountOutcome::Unchanged => {}
            },
        }
    }

    tracing::info!("Closing notification channel...");
    bridge.shutdown().await;
    let _ = refetch_handle.await;

    match encode_metrics() {
        Ok(metrics) => tracing::debug!(metrics = %metrics, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    tracing::info!(
        status = quotes.status(),
        refetches = quotes.request_count(),
        "Shutdown complete"
    );
    Ok(())
}

async fn log_refetches(
    mut requests: broadcast::Receiver<RefetchRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            request = requests.recv() => match request {
                Ok(request) => tracing::info!(
                    status = %request.status,
                    sequence = request.sequence,
                    requested_at = %request.requested_at,
                    "Quotes refetch requested"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Refetch listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn shutdown_signal_handler(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(true);
}

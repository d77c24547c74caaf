use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use ara_realtime_client::api::{ops_routes, OpsState};
use ara_realtime_client::config::Settings;
use ara_realtime_client::telemetry::init_telemetry;
use ara_realtime_client::{ConnectionEvent, ConnectionManager, Credentials, InboundMessage};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(
        url = %settings.client.url,
        transport = ?settings.transport.kind,
        protocol = ?settings.client.protocol,
        "Configuration loaded"
    );

    let manager = Arc::new(ConnectionManager::from_settings(&settings)?);

    // Log lifecycle events
    let mut events = manager.events();
    let events_handle = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(ConnectionEvent::Connected {
                    connection_id,
                    session_id,
                }) => {
                    tracing::info!(connection_id = %connection_id, session_id = ?session_id, "Connected")
                }
                Ok(ConnectionEvent::Reconnecting {
                    attempt,
                    delay,
                    error,
                }) => tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Reconnecting"
                ),
                Ok(ConnectionEvent::Failed(error)) => {
                    tracing::error!(error = %error, "Connection failed")
                }
                Ok(event) => tracing::info!(state = %event.state(), "Connection state changed"),
                Err(e) => tracing::warn!(error = %e, "Lagging behind connection events"),
            }
        }
    });

    for channel in &settings.channels {
        manager.subscribe(channel.as_str(), |message: &InboundMessage| -> anyhow::Result<()> {
            tracing::info!(
                destination = %message.destination,
                payload = %message.payload,
                "Message received"
            );
            Ok(())
        })?;
    }
    tracing::info!(channels = settings.channels.len(), "Subscriptions registered");

    let mut credentials = Credentials::new(settings.client.identity.clone());
    credentials.token = settings.client.token.clone();
    manager.connect(credentials).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let ops_handle = if settings.ops.enabled {
        let app = ops_routes(OpsState::new(manager.clone()));
        let addr = settings.ops_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Ops endpoints listening on {}", addr);

        let mut shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Ops server failed");
            }
        }))
    } else {
        None
    };

    shutdown_signal_handler().await;
    let _ = shutdown_tx.send(());

    if let Some(handle) = ops_handle {
        let _ = handle.await;
    }

    match Arc::try_unwrap(manager) {
        Ok(manager) => manager.dispose().await?,
        Err(shared) => shared.disconnect().await?,
    }
    events_handle.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
}

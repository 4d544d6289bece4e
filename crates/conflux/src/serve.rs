// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `conflux serve` command implementation.
//!
//! Opens storage, builds the adapter registry from compiled-in providers,
//! reconciles webhook subscriptions for active channels, and runs the HTTP
//! gateway until SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conflux_config::ConfluxConfig;
use conflux_core::{AdapterRegistry, ConfluxError};
use conflux_directory::ConversationDirectory;
use conflux_dispatch::{BackoffPolicy, OutboundDispatcher};
use conflux_gateway::auth::AuthConfig;
use conflux_gateway::{server, GatewayState};
use conflux_ingest::IngestPipeline;
use conflux_storage::Database;
use conflux_subscriptions::SubscriptionManager;
use conflux_widget::WidgetAdapter;

/// Builds the registry of compiled-in provider adapters.
fn build_registry(config: &ConfluxConfig) -> AdapterRegistry {
    let burst = config.ratelimit.burst;
    let per_second = config.ratelimit.per_second;

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(WidgetAdapter::new()));

    #[cfg(feature = "telegram")]
    registry.register(Arc::new(conflux_telegram::TelegramAdapter::new(
        burst, per_second,
    )));

    #[cfg(feature = "vk")]
    registry.register(Arc::new(conflux_vk::VkAdapter::new(burst, per_second)));

    #[cfg(feature = "avito")]
    registry.register(Arc::new(conflux_avito::AvitoAdapter::new(
        burst, per_second,
    )));

    #[cfg(feature = "whatsapp")]
    registry.register(Arc::new(conflux_whatsapp::WhatsappAdapter::new(
        burst, per_second,
    )));

    registry
}

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is
/// received.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler, Ctrl+C only");
                    let _ = ctrl_c.await;
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                    token_clone.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Runs the `conflux serve` command.
pub async fn run_serve(config: ConfluxConfig) -> Result<(), ConfluxError> {
    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "starting conflux serve");

    let db = Arc::new(Database::open(&config.storage.database_path).await?);
    info!(path = %config.storage.database_path, "storage opened");

    let registry = Arc::new(build_registry(&config));

    let policy = BackoffPolicy {
        max_attempts: config.dispatch.max_attempts,
        base_delay: Duration::from_millis(config.dispatch.base_delay_ms),
        multiplier: config.dispatch.backoff_multiplier,
    };
    let send_timeout = Duration::from_secs(config.dispatch.send_timeout_secs);

    let subscriptions = Arc::new(SubscriptionManager::new(
        db.clone(),
        registry.clone(),
        config.server.public_base_url.clone(),
    ));

    // Reconcile webhook registrations for every active channel; individual
    // failures are logged inside and do not block startup.
    let reconciled = subscriptions.ensure_all_active().await?;
    info!(channels = reconciled.len(), "webhook subscriptions reconciled");

    let state = GatewayState {
        db: db.clone(),
        registry: registry.clone(),
        ingest: Arc::new(IngestPipeline::new(db.clone(), registry.clone())),
        directory: Arc::new(ConversationDirectory::new(db.clone())),
        dispatcher: Arc::new(OutboundDispatcher::new(
            db.clone(),
            registry,
            policy,
            send_timeout,
        )),
        subscriptions,
        auth: AuthConfig {
            bearer_token: config.server.bearer_token.clone(),
        },
    };

    if state.auth.bearer_token.is_none() {
        warn!("no server.bearer_token configured -- the /v1 API will reject all requests");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            ConfluxError::Config(format!(
                "invalid server address {}:{}: {e}",
                config.server.host, config.server.port
            ))
        })?;

    let cancel = install_signal_handler();
    server::serve(state, addr, cancel.cancelled_owned()).await?;

    db.close().await?;
    info!("conflux serve shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("conflux={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

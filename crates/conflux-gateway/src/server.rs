// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router assembly and the serve loop.

use std::future::Future;
use std::net::SocketAddr;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use conflux_core::ConfluxError;

use crate::auth::auth_middleware;
use crate::handlers;
use crate::GatewayState;

/// Builds the full route tree. Exposed so tests can drive the router
/// without binding a socket.
pub fn build_router(state: GatewayState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::get_health))
        .route(
            "/channels/{provider}/webhook/{channel_id}",
            post(handlers::post_webhook).get(handlers::get_webhook),
        );

    let api = Router::new()
        .route(
            "/v1/channels",
            post(handlers::post_channels).get(handlers::get_channels),
        )
        .route("/v1/channels/{id}", get(handlers::get_channel))
        .route("/v1/channels/{id}/activate", post(handlers::post_channel_activate))
        .route("/v1/channels/{id}/deactivate", post(handlers::post_channel_deactivate))
        .route("/v1/channels/{id}/subscription", post(handlers::post_channel_subscription))
        .route("/v1/conversations", get(handlers::get_conversations))
        .route("/v1/conversations/{id}", get(handlers::get_conversation))
        .route(
            "/v1/conversations/{id}/messages",
            get(handlers::get_conversation_messages).post(handlers::post_conversation_messages),
        )
        .route("/v1/conversations/{id}/read", post(handlers::post_conversation_read))
        .route("/v1/conversations/{id}/archive", post(handlers::post_conversation_archive))
        .route("/v1/messages/{id}/delivery", get(handlers::get_message_delivery))
        .layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    public
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve(
    state: GatewayState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ConfluxError> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ConfluxError::Config(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ConfluxError::Internal(format!("server error: {e}")))
}

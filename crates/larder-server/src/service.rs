use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use larder_protocol::Claims;
use liblarder::error::LarderError;
use liblarder::hub::SyncHub;
use liblarder::store::ListStore;

use crate::api;
use crate::auth::{self, StaticTokenVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::events;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SyncHub>,
    pub store: Arc<Mutex<ListStore>>,
    pub verifier: Arc<dyn TokenVerifier>,
}

pub fn build_state(config: &ServerConfig) -> AppState {
    AppState {
        hub: Arc::new(SyncHub::new(config.hub_config())),
        store: Arc::new(Mutex::new(ListStore::new())),
        verifier: Arc::new(StaticTokenVerifier::new(&config.tokens)),
    }
}

pub(crate) fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Claims, LarderError> {
    let token = auth::bearer_token(headers)?;
    state.verifier.verify(token)
}

pub fn build_router(state: AppState, allow_origins: &[String]) -> Result<Router> {
    let cors = build_cors(allow_origins)?;
    Ok(Router::new()
        .route("/api/status", get(api::status))
        .route("/api/events", get(events::stream_events))
        .route("/api/lists", get(api::list_lists).post(api::create_list))
        .route(
            "/api/lists/{id}",
            get(api::get_list)
                .patch(api::rename_list)
                .delete(api::delete_list),
        )
        .route("/api/lists/{id}/items", axum::routing::post(api::add_item))
        .route(
            "/api/lists/{id}/items/{item_id}",
            axum::routing::patch(api::update_item).delete(api::remove_item),
        )
        .layer(cors)
        .with_state(state))
}

fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid --allow-origin value: {origin}"))?,
        );
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any))
}

/// Bind, serve in a background task, and hand back the bound address plus a
/// shutdown trigger. Used by the integration harness.
pub async fn spawn_server(
    config: ServerConfig,
    allow_origins: Vec<String>,
) -> Result<(SocketAddr, oneshot::Sender<()>)> {
    let state = build_state(&config);
    let hub = Arc::clone(&state.hub);
    let router = build_router(state, &allow_origins)?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    let addr = listener.local_addr()?;

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = hub.spawn_heartbeat(heartbeat_cancel.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    // Closing the hub ends every open stream body, which lets the serve
    // future drain and complete.
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
        heartbeat_cancel.cancel();
        hub.shutdown();
    });
    tokio::spawn(async move {
        if let Err(e) = serve.await {
            error!("server error: {e}");
        }
        let _ = heartbeat.await;
    });

    Ok((addr, shutdown_tx))
}

/// Serve until ctrl-c. Shutdown closes every registry connection; there is
/// no drain step because delivery is best-effort.
pub async fn run(config: ServerConfig, allow_origins: Vec<String>) -> Result<()> {
    let state = build_state(&config);
    let hub = Arc::clone(&state.hub);
    let router = build_router(state, &allow_origins)?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("larder-server listening on http://{}", listener.local_addr()?);

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = hub.spawn_heartbeat(heartbeat_cancel.clone());

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
            heartbeat_cancel.cancel();
            hub.shutdown();
        })
        .await?;

    let _ = heartbeat.await;
    Ok(())
}

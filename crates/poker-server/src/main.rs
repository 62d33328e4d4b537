mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use poker_api::{ApiError, AppStateInner};
use poker_db::{Database, Store};
use poker_gateway::{Dispatcher, SyncGateway, connection};
use poker_session::{CredentialService, SessionMachine};

use crate::config::Config;

#[derive(Clone)]
struct WsState {
    gateway: SyncGateway,
    credentials: CredentialService,
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poker=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    let machine = SessionMachine::new(store.clone());
    let gateway = SyncGateway::new(machine, Dispatcher::new());
    let credentials = CredentialService::new(
        store,
        &config.jwt_secret,
        &config.frontend_origin,
        config.magic_link_ttl,
    );

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(WsState {
            gateway: gateway.clone(),
            credentials: credentials.clone(),
        });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_str(
            &config.frontend_origin,
        )?))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = poker_api::router(AppStateInner::new(gateway, credentials))
        .merge(ws_route)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Poker server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// GET /gateway. A `?token=` is checked before the upgrade; without one the
/// client has to send `identify` as its first frame.
async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match query.token.as_deref() {
        Some(token) => match state.credentials.authenticate(token) {
            Ok(claims) => Some(claims),
            Err(e) => return ApiError(e).into_response(),
        },
        None => None,
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, state.credentials, claims)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

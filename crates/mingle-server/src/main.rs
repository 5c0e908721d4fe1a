use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::get,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mingle_api::{AppState, AppStateInner, messages, middleware::require_auth};
use mingle_gateway::connection;
use mingle_gateway::delivery::Delivery;
use mingle_gateway::registry::ConnectionRegistry;
use mingle_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    registry: ConnectionRegistry,
    delivery: Delivery,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mingle=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("MINGLE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("MINGLE_DB_PATH").unwrap_or_else(|_| "mingle.db".into());
    let host = std::env::var("MINGLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("MINGLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init message store
    let db = Arc::new(mingle_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the registry is the single owned instance for the whole
    // process; everything else takes a handle.
    let registry = ConnectionRegistry::new();
    let delivery = Delivery::new(db.clone(), registry.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        registry,
        delivery,
        jwt_secret,
    };

    // Routes
    let protected_routes = Router::new()
        .route("/messages/{peer_id}", get(messages::get_conversation))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Mingle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Authenticate at the upgrade layer. A missing or invalid token degrades
    // to an anonymous connection that is never registered for pushes.
    let identity = params.token.as_deref().and_then(|token| {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| warn!("gateway token rejected: {}", e))
        .ok()
        .map(|data| data.claims)
    });

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.registry, state.delivery, identity)
    })
}

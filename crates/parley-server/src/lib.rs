pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_api::attachments::{self, ATTACHMENTS_ROUTE, AttachmentStore};
use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::history;
use parley_api::middleware::{decode_token, require_auth};
use parley_api::rooms::{self, Lookup, authorize_room};
use parley_db::Database;
use parley_gateway::session;
use parley_gateway::{Engine, EngineConfig, RoomRegistry};
use parley_types::models::Identity;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    heartbeat_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Wire the store, registry and engine together and build the router.
pub async fn build_app(config: &Config, db: Database) -> anyhow::Result<Router> {
    let db = Arc::new(db);
    let engine = Engine::new(
        db.clone(),
        RoomRegistry::new(),
        EngineConfig {
            typing_identity: config.typing_identity,
            outbound_buffer: config.outbound_buffer,
        },
    );
    let attachments = AttachmentStore::new(config.attachments_dir.clone()).await?;
    let serve_attachments = ServeDir::new(attachments.dir());

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        jwt_secret: config.jwt_secret.clone(),
        attachments,
        max_upload_bytes: config.max_upload_bytes,
    });

    let state = ServerState {
        app: app_state.clone(),
        heartbeat_interval: config.heartbeat_interval,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/{room}", get(rooms::enter_room))
        .route("/rooms/{room}/messages", get(history::get_messages))
        .route(
            "/rooms/{room}/upload",
            post(attachments::upload_attachment)
                .layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/ws/rooms/{room}", get(ws_upgrade))
        .with_state(state);

    Ok(Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service(ATTACHMENTS_ROUTE, serve_attachments)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

/// Authorize before upgrading: a rejected caller never gets a session.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Path(room): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let identity = match query.token {
        Some(token) => {
            let claims =
                decode_token(&state.app.jwt_secret, &token).ok_or(StatusCode::UNAUTHORIZED)?;
            Identity::user(claims.sub, claims.username)
        }
        None => Identity::Anonymous,
    };

    // Only signed-in users bring new rooms into existence
    let lookup = match identity {
        Identity::User { .. } => Lookup::GetOrCreate,
        Identity::Anonymous => Lookup::Existing,
    };
    authorize_room(&state.app, &room, identity.user_id(), lookup).await?;

    let engine = state.app.engine.clone();
    let heartbeat_interval = state.heartbeat_interval;
    Ok(ws.on_upgrade(move |socket| {
        session::handle_session(socket, engine, room, identity, heartbeat_interval)
    }))
}

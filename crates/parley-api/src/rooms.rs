use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::models::RoomRow;
use parley_types::api::{Claims, CreateRoomRequest, CreateRoomResponse, MessageResponse, RoomView};
use parley_types::models::Room;

use crate::auth::AppState;
use crate::run_blocking;

/// Messages shown when entering a room.
const RECENT_MESSAGES: i64 = 50;

/// How a boundary handler resolves a room name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Create the room on first reference.
    GetOrCreate,
    /// 404 when the room does not exist.
    Existing,
}

/// Resolve a room and check that `user_id` may use it.
///
/// Private rooms without membership are rejected with 403 here, so nothing
/// behind this gate needs to re-check.
pub async fn authorize_room(
    state: &AppState,
    name: &str,
    user_id: Option<Uuid>,
    lookup: Lookup,
) -> Result<RoomRow, StatusCode> {
    let db = state.db.clone();
    let name = name.to_string();
    let (room, allowed) = run_blocking(move || {
        let room = match lookup {
            Lookup::GetOrCreate => Some(db.ensure_room(&name)?),
            Lookup::Existing => db.get_room(&name)?,
        };
        let Some(room) = room else {
            return Ok(None);
        };
        let allowed = db.can_access(&room, user_id.map(|id| id.to_string()).as_deref())?;
        Ok(Some((room, allowed)))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    if !allowed {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(room)
}

/// GET /rooms: public rooms, newest first.
pub async fn list_rooms(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rooms = run_blocking(move || {
        db.list_public_rooms()?
            .iter()
            .map(RoomRow::to_room)
            .collect::<anyhow::Result<Vec<Room>>>()
    })
    .await?;

    Ok(Json(rooms))
}

/// POST /rooms
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let creator = claims.sub.to_string();
    let is_private = req.is_private;
    let (room, created) = run_blocking(move || db.create_room(&name, is_private, &creator)).await?;

    if created {
        info!(
            "{} created {} room {}",
            claims.username,
            if room.is_private { "private" } else { "public" },
            room.name
        );
    }

    Ok(Json(CreateRoomResponse {
        room: room.name,
        created,
    }))
}

/// GET /rooms/{room}: enter a room, joining its participants.
pub async fn enter_room(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = authorize_room(&state, &name, Some(claims.sub), Lookup::GetOrCreate).await?;

    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let room_id = room.id;
    let page = run_blocking(move || {
        db.add_participant(room_id, &user_id)?;
        db.list_messages(room_id, 1, RECENT_MESSAGES)
    })
    .await?;

    let room = room.to_room().map_err(|e| {
        error!("Corrupt room row {}: {:#}", room.name, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(RoomView {
        room,
        messages: page.messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

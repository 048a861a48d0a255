use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::api::{Claims, HistoryPage, HistoryQuery, MessageResponse};

use crate::auth::AppState;
use crate::rooms::{Lookup, authorize_room};
use crate::run_blocking;

/// GET /rooms/{room}/messages?page=&per_page=
///
/// Page 1 is the most recent page; each page lists its messages oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = authorize_room(&state, &name, Some(claims.sub), Lookup::Existing).await?;

    let db = state.db.clone();
    let page = run_blocking(move || db.list_messages(room.id, query.page, query.per_page)).await?;

    Ok(Json(HistoryPage {
        messages: page.messages.into_iter().map(MessageResponse::from).collect(),
        page: page.page,
        num_pages: page.num_pages,
    }))
}

use std::path::{Path as FsPath, PathBuf};

use anyhow::Result;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_gateway::EngineError;
use parley_types::api::{Claims, MessageResponse, UploadQuery};
use parley_types::models::Identity;

use crate::auth::AppState;
use crate::rooms::{Lookup, authorize_room};

/// URL prefix attachments are served under.
pub const ATTACHMENTS_ROUTE: &str = "/attachments";

/// Flat on-disk storage for uploaded attachments.
///
/// Each upload is stored at `{dir}/{uuid}[.ext]`; the stored message only keeps
/// the resulting URL.
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &FsPath {
        &self.dir
    }

    /// Write `data` to disk and return its public locator.
    pub async fn save(&self, data: &[u8], filename: Option<&str>) -> Result<String> {
        let name = match filename.and_then(extension) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        fs::write(self.dir.join(&name), data).await?;
        Ok(format!("{}/{}", ATTACHMENTS_ROUTE, name))
    }

    /// Remove a previously saved attachment by locator.
    pub async fn discard(&self, locator: &str) {
        let Some(name) = locator.rsplit('/').next() else {
            return;
        };
        if let Err(e) = fs::remove_file(self.dir.join(name)).await {
            warn!("Failed to discard attachment {}: {}", locator, e);
        }
    }
}

/// Short alphanumeric extension of a client-supplied filename, if any.
fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// POST /rooms/{room}/upload?text=&filename= with the raw file as body.
///
/// The resulting message goes through the engine, so room members receive it
/// like any other chat message.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<UploadQuery>,
    Extension(claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if bytes.len() > state.max_upload_bytes {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let room = authorize_room(&state, &name, Some(claims.sub), Lookup::Existing).await?;

    let locator = state
        .attachments
        .save(&bytes, query.filename.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to store attachment: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let identity = Identity::user(claims.sub, claims.username);
    let msg = match state
        .engine
        .publish_attachment(&room.name, &identity, query.text, locator.clone())
        .await
    {
        Ok(msg) => msg,
        Err(e) => {
            state.attachments.discard(&locator).await;
            return Err(match e {
                EngineError::EmptyMessage => StatusCode::BAD_REQUEST,
                EngineError::Anonymous(_) => StatusCode::UNAUTHORIZED,
                EngineError::Persistence(_) | EngineError::StoreTask(_) => {
                    error!("Upload to {} failed: {}", room.name, e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            });
        }
    };

    Ok((StatusCode::CREATED, Json(MessageResponse::from(msg))))
}

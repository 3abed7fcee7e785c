use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

/// Multipart field carrying the images.
const FILES_FIELD: &str = "files";

pub fn router(storage: &StorageConfig) -> Router<AppState> {
    // Room for every file at full size plus multipart framing.
    let body_limit = storage
        .max_file_bytes
        .saturating_mul(storage.max_files)
        .saturating_add(64 * 1024);

    Router::new()
        .route("/api/uploads", post(upload))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// POST /api/uploads
///
/// All or nothing: if any part is rejected, the files already written for
/// this request are removed again.
async fn upload(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Value>> {
    let mut multipart = multipart.map_err(|e| AppError::Validation(e.body_text()))?;
    let mut written = Vec::new();
    if let Err(e) = receive_files(
        &mut multipart,
        &state.config.storage,
        state.config.uploads_path(),
        &mut written,
    )
    .await
    {
        discard(&written).await;
        return Err(e);
    }

    let urls: Vec<String> = written
        .iter()
        .filter_map(|path| path.file_name()?.to_str())
        .map(|name| format!("/uploads/{name}"))
        .collect();
    tracing::info!("User {} uploaded {} files", user.id, urls.len());
    Ok(Json(json!({ "urls": urls })))
}

/// Writes each accepted part to `dir`, recording its path in `written`
/// before the write starts.
async fn receive_files(
    multipart: &mut Multipart,
    storage: &StorageConfig,
    dir: &Path,
    written: &mut Vec<PathBuf>,
) -> AppResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        if written.len() >= storage.max_files {
            return Err(AppError::Validation(format!(
                "Too many files. Maximum is {}",
                storage.max_files
            )));
        }

        let ext = extension_for(field.file_name(), field.content_type());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        if data.len() > storage.max_file_bytes {
            return Err(AppError::Validation(format!(
                "File too large. Maximum is {} bytes",
                storage.max_file_bytes
            )));
        }

        let path = dir.join(stored_name(&ext));
        written.push(path.clone());
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store upload: {e}")))?;
    }
    Ok(())
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

/// `<unix millis>-<random>` plus the extension, so names never collide.
fn stored_name(ext: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{millis}-{suffix}{ext}")
}

/// Extension with its leading dot, from the client file name or else the
/// part's content type. Empty when neither yields one.
fn extension_for(file_name: Option<&str>, content_type: Option<&str>) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_string);
    let from_type = || {
        content_type
            .and_then(mime_guess::get_mime_extensions_str)
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
    };

    from_name
        .or_else(from_type)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

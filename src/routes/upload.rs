// ============================================================================
// Upload Routes
// ============================================================================
//
// Endpoints:
// - POST /api/upload - Multipart upload, starts a background ingestion task
// - GET /api/upload/status/:task_id - Progress of a task (owner or admin)
// - GET /api/upload/stats - Document count of an index
//
// ============================================================================

use axum::{
    extract::{Multipart, Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::collaborators::{file_extension, normalize_index_name, DEFAULT_INDEX_NAME};
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::jobs::{spawn_ingestion, IngestionJob};
use crate::routes::extractors::{AuthenticatedUser, ClientIp};
use crate::routes::Throttle;

const UPLOAD_POST: Throttle = Throttle::new("upload-post", 20);
const UPLOAD_STATUS: Throttle = Throttle::new("upload-status", 300);
const UPLOAD_STATS: Throttle = Throttle::new("upload-stats", 120);

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_FILENAME_LENGTH: usize = 255;

const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "txt", "text", "md", "py", "js", "java", "c", "cpp", "h", "cs", "ts", "tsx",
    "html", "css", "json",
];

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub task_id: String,
    pub file_name: String,
    pub index_name: String,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub index_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_documents: usize,
    pub recent_uploads: usize,
    pub status: String,
    pub index_name: String,
    pub mode: String,
}

struct UploadForm {
    file_name: String,
    bytes: Vec<u8>,
    index_name: Option<String>,
}

/// POST /api/upload
///
/// Multipart fields: `file` (required) and `index_name` (optional).
pub async fn upload_document(
    State(app_context): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<Response> {
    UPLOAD_POST.enforce(&app_context, &user, &client_ip)?;
    let csrf = app_context.csrf.rotate_from_headers(&headers, &user.email)?;

    Ok(csrf.respond(start_upload(&app_context, &user, multipart).await))
}

async fn read_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        AppError::validation(format!("Malformed upload: {}", e.body_text()))
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut index_name = None;
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().trim().to_string();
                let bytes = field.bytes().await.map_err(malformed)?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("index_name") => {
                index_name = Some(field.text().await.map_err(malformed)?);
            }
            _ => {}
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| AppError::validation("file is required"))?;
    Ok(UploadForm {
        file_name,
        bytes,
        index_name,
    })
}

fn validate_file(file_name: &str, bytes: &[u8]) -> AppResult<()> {
    if file_name.is_empty() {
        return Err(AppError::validation("File name is required"));
    }
    if file_name.chars().count() > MAX_FILENAME_LENGTH {
        return Err(AppError::validation(format!(
            "File name is limited to {} characters",
            MAX_FILENAME_LENGTH
        )));
    }
    if file_name.contains(['/', '\\']) {
        return Err(AppError::validation("File name must not contain a path"));
    }
    let ext = file_extension(file_name);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::validation(format!(
            "Unsupported file type: .{}",
            if ext.is_empty() { "unknown" } else { ext.as_str() }
        )));
    }
    if bytes.is_empty() {
        return Err(AppError::validation("Uploaded file is empty"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::validation("Uploaded file is too large (max 20MB)"));
    }
    Ok(())
}

async fn start_upload(
    app_context: &AppContext,
    user: &AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let form = read_form(multipart).await?;
    validate_file(&form.file_name, &form.bytes)?;
    let index_name = normalize_index_name(form.index_name.as_deref())?
        .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());

    let task_id = Uuid::new_v4().to_string();
    app_context.tasks.create(&task_id, &user.email);

    tracing::info!(
        user_hash = %app_context.log_id(&user.email),
        task_id = %task_id,
        size = form.bytes.len(),
        "Upload accepted"
    );

    spawn_ingestion(
        app_context.tasks.clone(),
        app_context.collaborators.clone(),
        IngestionJob {
            task_id: task_id.clone(),
            file_name: form.file_name.clone(),
            bytes: form.bytes,
            index_name: index_name.clone(),
        },
    );

    Ok(Json(UploadResponse {
        message: "Upload started".to_string(),
        task_id,
        file_name: form.file_name,
        index_name,
    }))
}

/// GET /api/upload/status/:task_id
pub async fn upload_status(
    State(app_context): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    ClientIp(client_ip): ClientIp,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    UPLOAD_STATUS.enforce(&app_context, &user, &client_ip)?;

    let task = app_context
        .tasks
        .read(&task_id, true)
        .ok_or_else(|| AppError::not_found("Task not found"))?;

    let is_owner = task.owner.as_deref() == Some(user.email.as_str());
    if !user.is_admin() && !is_owner {
        tracing::warn!(
            user_hash = %app_context.log_id(&user.email),
            task_id = %task_id,
            "Task read denied"
        );
        return Err(AppError::forbidden("You do not have access to this task"));
    }

    Ok(Json(task.into_public()))
}

/// GET /api/upload/stats
pub async fn upload_stats(
    State(app_context): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    ClientIp(client_ip): ClientIp,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    UPLOAD_STATS.enforce(&app_context, &user, &client_ip)?;

    let index_name = normalize_index_name(query.index_name.as_deref())?
        .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());

    let (total_documents, status) = match app_context
        .collaborators
        .index
        .document_count(&index_name)
        .await
    {
        Ok(count) => (count, "active"),
        Err(e) => {
            tracing::error!(index = %index_name, error = %e, "Document count failed");
            (0, "error")
        }
    };

    Ok(Json(StatsResponse {
        total_documents,
        recent_uploads: app_context.tasks.len(),
        status: status.to_string(),
        index_name,
        mode: app_context.mode().to_string(),
    }))
}

//! Attachments: multipart upload, listing, deletion, and public file
//! serving.
//!
//! Files land in the uploads directory under a content-addressed name
//! (`<sha256 prefix>_<sanitized original>`), which makes `/files/{name}`
//! unguessable without a link — the serving route carries no auth.

use axum::extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::utils::envelope::PageQuery;
use crate::utils::validation::sanitize_filename;
use crate::utils::{ApiResponse, AppError, AppResult, created, now_millis, ok, ok_list};

/// Upload size cap: 32 MiB.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/attachments", get(list).post(upload))
        .route("/api/v1/attachments/{id}", axum::routing::delete(remove))
        .route("/files/{stored_name}", get(serve_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: String,
    pub module: String,
    pub record_id: String,
    pub filename: String,
    pub stored_name: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub uploaded_by: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    module: Option<String>,
    record_id: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Attachment>>>> {
    let page = page.clamped();
    let mut conditions = Vec::new();
    if query.module.is_some() {
        conditions.push("module = ?");
    }
    if query.record_id.is_some() {
        conditions.push("record_id = ?");
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM attachments{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(ref m) = query.module {
        count_query = count_query.bind(m);
    }
    if let Some(ref r) = query.record_id {
        count_query = count_query.bind(r);
    }
    let total = count_query.fetch_one(&state.db.pool).await?;

    let select_sql = format!(
        "SELECT id, module, record_id, filename, stored_name, size_bytes, content_type, \
         uploaded_by, created_at FROM attachments{where_clause} ORDER BY created_at DESC \
         LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Attachment>(&select_sql);
    if let Some(ref m) = query.module {
        select_query = select_query.bind(m);
    }
    if let Some(ref r) = query.record_id {
        select_query = select_query.bind(r);
    }
    let rows = select_query
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&state.db.pool)
        .await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

/// Multipart upload with fields `module`, `record_id`, `file`.
async fn upload(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut module = None;
    let mut record_id = None;
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("module") => {
                module = Some(field.text().await.map_err(|e| {
                    AppError::validation(format!("Malformed multipart body: {e}"))
                })?);
            }
            Some("record_id") => {
                record_id = Some(field.text().await.map_err(|e| {
                    AppError::validation(format!("Malformed multipart body: {e}"))
                })?);
            }
            Some("file") => {
                let filename = sanitize_filename(field.file_name().unwrap_or("file"));
                let content_type = field.content_type().map(|ct| ct.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::validation(format!("Failed to read upload: {e}"))
                })?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(AppError::validation("File exceeds the 32 MiB upload cap"));
                }
                file = Some((filename, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let module = module.ok_or_else(|| AppError::validation("module is required"))?;
    let record_id = record_id.ok_or_else(|| AppError::validation("record_id is required"))?;
    let (filename, content_type, bytes) =
        file.ok_or_else(|| AppError::validation("file is required"))?;

    let digest = hex::encode(Sha256::digest(&bytes));
    let stored_name = format!("{}_{filename}", &digest[..12]);
    let disk_path = std::path::Path::new(&state.config.uploads_dir).join(&stored_name);
    tokio::fs::write(&disk_path, &bytes)
        .await
        .map_err(|e| AppError::internal(format!("Failed to store upload: {e}")))?;

    let id = uuid::Uuid::new_v4().to_string();
    let size = bytes.len() as i64;
    sqlx::query(
        "INSERT INTO attachments (id, module, record_id, filename, stored_name, size_bytes, \
         content_type, uploaded_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (stored_name) DO UPDATE SET created_at = excluded.created_at",
    )
    .bind(&id)
    .bind(&module)
    .bind(&record_id)
    .bind(&filename)
    .bind(&stored_name)
    .bind(size)
    .bind(&content_type)
    .bind(&user.username)
    .bind(now_millis())
    .execute(&state.db.pool)
    .await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "upload",
        "attachments",
        &record_id,
        format!("Uploaded {filename} ({size} bytes) to {module}/{record_id}"),
    );

    let row: Attachment = sqlx::query_as(
        "SELECT id, module, record_id, filename, stored_name, size_bytes, content_type, \
         uploaded_by, created_at FROM attachments WHERE stored_name = ?",
    )
    .bind(&stored_name)
    .fetch_one(&state.db.pool)
    .await?;
    Ok(created(row))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let row: Option<Attachment> = sqlx::query_as(
        "SELECT id, module, record_id, filename, stored_name, size_bytes, content_type, \
         uploaded_by, created_at FROM attachments WHERE id = ?",
    )
    .bind(&id)
    .fetch_optional(&state.db.pool)
    .await?;
    let row = row.ok_or_else(|| AppError::not_found(format!("Attachment {id}")))?;

    sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    // Best-effort file removal; the row is the source of truth.
    let disk_path = std::path::Path::new(&state.config.uploads_dir).join(&row.stored_name);
    if let Err(e) = tokio::fs::remove_file(&disk_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(error = %e, file = %row.stored_name, "Failed to remove attachment file");
    }

    state.audit.log(
        Some(&user),
        Some(&meta),
        "delete",
        "attachments",
        &row.record_id,
        format!("Deleted attachment {}", row.filename),
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}

/// Public file serving with content-type inference.
async fn serve_file(
    State(state): State<ServerState>,
    Path(stored_name): Path<String>,
) -> AppResult<Response> {
    // Path params cannot smuggle separators past the router, but be
    // explicit anyway.
    if stored_name.contains(['/', '\\']) || stored_name.contains("..") {
        return Err(AppError::validation("Invalid file name"));
    }

    let disk_path = std::path::Path::new(&state.config.uploads_dir).join(&stored_name);
    let bytes = match tokio::fs::read(&disk_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::not_found(format!("File {stored_name}")));
        }
        Err(e) => return Err(AppError::internal(format!("Failed to read file: {e}"))),
    };

    let mime = mime_guess::from_path(&stored_name).first_or_octet_stream();
    Ok((
        [(header::CONTENT_TYPE, mime.to_string())],
        bytes,
    )
        .into_response())
}

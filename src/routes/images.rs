use std::path::Path as FsPath;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Json, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, parse_id};
use crate::models::{ApiResponse, Image, ImageResponse, PageQuery, PageRequest, Pagination, User};
use crate::routes::auth::extract_current_user;
use crate::state::AppState;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Accepted upload types and the extension each is stored under.
const ALLOWED_CONTENT_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
];

fn extension_for(content_type: &str) -> Option<&'static str> {
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

/// A file received from a multipart upload, before it is stored.
pub struct NewImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub alt_text: Option<String>,
}

pub fn images_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_images_handler).post(upload_image_handler))
        .route("/{image_id}", delete(delete_image_handler))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024))
}

async fn list_images_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageRequest::new(query.page, query.limit);
    let (images, pagination) = list_images(&state.pool, page).await?;
    Ok(Json(ApiResponse::success(images).with_pagination(pagination)))
}

async fn upload_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;

    let mut upload: Option<NewImage> = None;
    let mut alt_text: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "alt" => {
                alt_text = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::validation(e.to_string()))?,
                );
            }
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(e.to_string()))?;

                upload = Some(NewImage {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                    alt_text: None,
                });
            }
            _ => {}
        }
    }

    let mut upload = upload.ok_or_else(|| AppError::validation("An image file is required"))?;
    upload.alt_text = alt_text;

    let image = save_image(&state.pool, &state.config.upload_dir, upload, &current_user).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(image).with_message("Image uploaded")),
    ))
}

async fn delete_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    delete_image(&state.pool, &image_id, &current_user).await?;
    Ok(Json(
        ApiResponse::success(serde_json::Value::Null).with_message("Image deleted successfully"),
    ))
}

// ============================
// Service
// ============================

pub async fn save_image(
    pool: &SqlitePool,
    upload_dir: &FsPath,
    upload: NewImage,
    actor: &User,
) -> Result<ImageResponse, AppError> {
    let ext = extension_for(&upload.content_type).ok_or_else(|| {
        AppError::validation(format!("Unsupported image type: {}", upload.content_type))
    })?;
    if upload.bytes.is_empty() {
        return Err(AppError::validation("Uploaded file is empty"));
    }
    if upload.bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::validation("Image exceeds the 10 MB limit"));
    }

    let image_id = Uuid::new_v4().to_string();
    let unique_name = format!("{image_id}.{ext}");
    let file_path = upload_dir.join(&unique_name);

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(AppError::internal)?;
    tokio::fs::write(&file_path, &upload.bytes)
        .await
        .map_err(AppError::internal)?;

    let alt_text = upload
        .alt_text
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    let inserted = sqlx::query(
        r#"INSERT INTO images
           (id, url, file_path, file_name, content_type, size_bytes, alt_text, uploaded_by, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&image_id)
    .bind(format!("/uploads/{unique_name}"))
    .bind(file_path.to_string_lossy().to_string())
    .bind(&upload.file_name)
    .bind(&upload.content_type)
    .bind(upload.bytes.len() as i64)
    .bind(&alt_text)
    .bind(&actor.id)
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(e) = inserted {
        let _ = tokio::fs::remove_file(&file_path).await;
        return Err(e.into());
    }

    tracing::info!(%image_id, size = upload.bytes.len(), "image uploaded");

    let image = sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = ?")
        .bind(&image_id)
        .fetch_one(pool)
        .await?;
    Ok(ImageResponse::from(image))
}

pub async fn list_images(
    pool: &SqlitePool,
    page: PageRequest,
) -> Result<(Vec<ImageResponse>, Pagination), AppError> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await?;

    let images = sqlx::query_as::<_, Image>(
        "SELECT * FROM images ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
    )
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((
        images.into_iter().map(ImageResponse::from).collect(),
        Pagination::new(total, page.page, page.limit),
    ))
}

pub async fn delete_image(pool: &SqlitePool, image_id: &str, actor: &User) -> Result<(), AppError> {
    let image_id = parse_id(image_id, "imageId")?;
    let image = sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = ?")
        .bind(&image_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;

    if image.uploaded_by != actor.id && !actor.is_admin {
        return Err(AppError::forbidden("Not authorized to delete this image"));
    }

    sqlx::query("DELETE FROM images WHERE id = ?")
        .bind(&image.id)
        .execute(pool)
        .await?;

    if let Err(e) = tokio::fs::remove_file(&image.file_path).await {
        tracing::warn!(image_id = %image.id, "failed to remove image file: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_user, test_state};

    fn png(name: &str) -> NewImage {
        NewImage {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
            alt_text: Some("  a cat ".to_string()),
        }
    }

    #[tokio::test]
    async fn save_writes_file_and_record() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "shutter").await;

        let image = save_image(&state.pool, &state.config.upload_dir, png("Cat.PNG"), &user)
            .await
            .unwrap();
        assert!(image.url.starts_with("/uploads/") && image.url.ends_with(".png"));
        assert_eq!(image.alt_text.as_deref(), Some("a cat"));
        assert_eq!(image.size_bytes, 4);

        let stored = state
            .config
            .upload_dir
            .join(image.url.trim_start_matches("/uploads/"));
        assert!(stored.exists());

        let (images, pagination) = list_images(&state.pool, PageRequest::new(None, None))
            .await
            .unwrap();
        assert_eq!(pagination.total, 1);
        assert_eq!(images[0].id, image.id);

        delete_image(&state.pool, &image.id, &user).await.unwrap();
        assert!(!stored.exists());
    }

    #[tokio::test]
    async fn save_rejects_non_images() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "sneaky").await;
        let mut upload = png("script.sh");
        upload.content_type = "text/x-shellscript".to_string();

        let err = save_image(&state.pool, &state.config.upload_dir, upload, &user)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn stored_extension_follows_content_type() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "renamer").await;

        let image = save_image(&state.pool, &state.config.upload_dir, png("x.html"), &user)
            .await
            .unwrap();
        assert!(image.url.ends_with(".png"), "unexpected url {}", image.url);
        assert_eq!(image.file_name, "x.html");

        let mut jpeg = png("photo");
        jpeg.content_type = "image/jpeg".to_string();
        let image = save_image(&state.pool, &state.config.upload_dir, jpeg, &user)
            .await
            .unwrap();
        assert!(image.url.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn only_uploader_may_delete() {
        let state = test_state().await;
        let owner = seed_user(&state.pool, "owner").await;
        let other = seed_user(&state.pool, "other").await;
        let image = save_image(&state.pool, &state.config.upload_dir, png("a.png"), &owner)
            .await
            .unwrap();

        let err = delete_image(&state.pool, &image.id, &other).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}

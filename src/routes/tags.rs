use axum::{
    Router,
    extract::{Json, State},
    response::IntoResponse,
    routing::get,
};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::editor::slugify;
use crate::error::AppError;
use crate::models::{ApiResponse, Tag, TagWithCount};
use crate::state::AppState;

pub fn tags_routes() -> Router<AppState> {
    Router::new().route("/", get(list_tags_handler))
}

async fn list_tags_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let tags = list_tags(&state.pool).await?;
    Ok(Json(ApiResponse::success(tags)))
}

/// Tags with the number of published posts carrying them, busiest first.
pub async fn list_tags(pool: &SqlitePool) -> Result<Vec<TagWithCount>, AppError> {
    let tags = sqlx::query_as::<_, TagWithCount>(
        r#"
        SELECT t.id, t.name, t.slug, COUNT(p.id) AS post_count
        FROM tags t
        LEFT JOIN post_tags pt ON pt.tag_id = t.id
        LEFT JOIN posts p ON p.id = pt.post_id AND p.is_published = TRUE
        GROUP BY t.id, t.name, t.slug
        ORDER BY post_count DESC, t.name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(tags)
}

/// Returns the tag with this name, creating it on first use.
pub async fn upsert_tag(conn: &mut SqliteConnection, name: &str) -> Result<Tag, AppError> {
    let name = name.trim();
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(AppError::validation(format!("Invalid tag: {name:?}")));
    }

    sqlx::query("INSERT INTO tags (id, name, slug) VALUES (?, ?, ?) ON CONFLICT DO NOTHING")
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(&slug)
        .execute(&mut *conn)
        .await?;

    let tag = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE name = ? OR slug = ? LIMIT 1")
        .bind(name)
        .bind(&slug)
        .fetch_one(&mut *conn)
        .await?;

    Ok(tag)
}

use axum::{
    Router,
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::ApiResponse;
use crate::routes::auth::extract_admin_user;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub users: i64,
    pub posts: i64,
    pub published_posts: i64,
    pub comments: i64,
    pub images: i64,
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/stats", get(admin_stats))
}

// ============================
// GET /admin/stats
// ============================
async fn admin_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let _admin = extract_admin_user(&state, &headers).await?;
    let stats = dashboard_stats(&state.pool).await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats, AppError> {
    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    let (posts, published_posts): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_published THEN 1 ELSE 0 END), 0) FROM posts",
    )
    .fetch_one(pool)
    .await?;

    let (comments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments")
        .fetch_one(pool)
        .await?;

    let (images,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await?;

    Ok(DashboardStats {
        users,
        posts,
        published_posts,
        comments,
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, get_json, seed_post, seed_user, test_state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn stats_require_admin() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "regular").await;
        seed_post(&state.pool, &user, "counted").await;

        let app = crate::create_app(state.clone());
        let (status, _) = get_json(app.clone(), "/api/admin/stats", Some(bearer(&state, &user))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        crate::db::promote_admin(&state.pool, "regular").await.unwrap();
        let (status, body) = get_json(app, "/api/admin/stats", Some(bearer(&state, &user))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["users"], 1);
        assert_eq!(body["data"]["posts"], 1);
        assert_eq!(body["data"]["publishedPosts"], 1);
    }

    #[tokio::test]
    async fn stats_on_empty_database_are_zero() {
        let state = test_state().await;
        let stats = dashboard_stats(&state.pool).await.unwrap();
        assert_eq!(
            stats,
            DashboardStats { users: 0, posts: 0, published_posts: 0, comments: 0, images: 0 }
        );
    }
}

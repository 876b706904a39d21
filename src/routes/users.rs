use axum::{
    Router,
    extract::{Json, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, put},
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{AppError, parse_id};
use crate::models::{ApiResponse, UpdateProfile, User, UserResponse};
use crate::routes::auth::{extract_current_user, find_user};
use crate::state::AppState;

pub fn users_routes() -> Router<AppState> {
    Router::new()
        .route("/me", put(update_profile_handler))
        .route("/{user_id}", get(get_user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_id(&user_id, "userId")?;
    let user = find_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(ApiResponse::success(UserResponse::from(user))))
}

async fn update_profile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<UpdateProfile>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let user = update_profile(&state.pool, current_user, input).await?;
    Ok(Json(
        ApiResponse::success(UserResponse::from(user)).with_message("Profile updated"),
    ))
}

/// Absent fields keep their value; blank fields clear it.
pub async fn update_profile(
    pool: &SqlitePool,
    current_user: User,
    input: UpdateProfile,
) -> Result<User, AppError> {
    let display_name = merge_field(input.display_name, current_user.display_name);
    let bio = merge_field(input.bio, current_user.bio);
    let avatar_url = merge_field(input.avatar_url, current_user.avatar_url);

    if display_name.as_deref().is_some_and(|n| n.chars().count() > 100) {
        return Err(AppError::validation(
            "Display name must be at most 100 characters",
        ));
    }

    sqlx::query(
        "UPDATE users SET display_name = ?, bio = ?, avatar_url = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&display_name)
    .bind(&bio)
    .bind(&avatar_url)
    .bind(Utc::now())
    .bind(&current_user.id)
    .execute(pool)
    .await?;

    find_user(pool, &current_user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

fn merge_field(input: Option<String>, current: Option<String>) -> Option<String> {
    match input {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => current,
    }
}

use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::{get, post},
};
use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{ApiResponse, CreateUser, LoginUser, TokenResponse, User, UserResponse};
use crate::state::AppState;

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(get_me))
}

// ============================
// Standard Auth
// ============================

async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<impl IntoResponse, AppError> {
    let username = input.username.trim();
    let email = input.email.trim();

    if username.is_empty() || email.is_empty() || input.password.is_empty() {
        return Err(AppError::validation(
            "Username, email and password are required",
        ));
    }
    if !email.contains('@') {
        return Err(AppError::validation("Invalid email format"));
    }
    if input.password.len() < 8 {
        return Err(AppError::validation(
            "Password must be at least 8 characters",
        ));
    }

    let existing = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM users WHERE username = ? OR email = ?",
    )
    .bind(username)
    .bind(email)
    .fetch_optional(&state.pool)
    .await?;

    if existing.is_some() {
        return Err(AppError::validation("Username or email already registered"));
    }

    let hashed = hash(&input.password, PASSWORD_HASH_COST).map_err(AppError::internal)?;
    let display_name = input
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| username.to_string());

    let user_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO users (id, username, email, hashed_password, display_name, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&user_id)
    .bind(username)
    .bind(email)
    .bind(&hashed)
    .bind(&display_name)
    .bind(Utc::now())
    .execute(&state.pool)
    .await?;

    let user = find_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::internal("registered user vanished"))?;

    tracing::info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserResponse::from(user))),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(input.username.trim())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("Incorrect username or password"))?;

    let valid = verify(&input.password, &user.hashed_password).map_err(AppError::internal)?;
    if !valid {
        return Err(AppError::unauthorized("Incorrect username or password"));
    }

    let token = generate_jwt(&state.config, &user.id)?;
    Ok(Json(ApiResponse::success(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    })))
}

async fn get_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = extract_current_user(&state, &headers).await?;
    Ok(Json(ApiResponse::success(UserResponse::from(user))))
}

// ============================
// Helper: Current User
// ============================

pub async fn extract_current_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("Invalid authorization header"))?;

    let user_id = decode_jwt(&state.config, token)
        .ok_or_else(|| AppError::unauthorized("Invalid token"))?;

    find_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("User not found"))
}

/// Like [`extract_current_user`], but anonymous or invalid credentials yield `None`.
pub async fn extract_optional_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<User>, AppError> {
    let Some(auth_header) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return Ok(None);
    };

    let Some(user_id) = decode_jwt(&state.config, token) else {
        return Ok(None);
    };

    Ok(find_user(&state.pool, &user_id).await?)
}

pub async fn extract_admin_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let user = extract_current_user(state, headers).await?;
    if !user.is_admin {
        return Err(AppError::forbidden("Admin access required"));
    }
    Ok(user)
}

pub async fn find_user(pool: &SqlitePool, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

// ============================
// Helper: JWT
// ============================

pub fn generate_jwt(config: &Config, user_id: &str) -> Result<String, AppError> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::hours(config.token_ttl_hours))
        .ok_or_else(|| AppError::internal("token expiry overflow"))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(AppError::internal)
}

fn decode_jwt(config: &Config, token: &str) -> Option<String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}

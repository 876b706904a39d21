use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use bcrypt::hash;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::Config;
use crate::db::init_db;
use crate::models::User;
use crate::routes::auth::{find_user, generate_jwt};
use crate::state::AppState;

pub const TEST_PASSWORD: &str = "password123";

pub async fn test_state() -> AppState {
    let config = Config::for_tests();
    let pool = init_db(&config.database_url).await.unwrap();
    AppState::new(pool, config)
}

pub async fn seed_user(pool: &SqlitePool, username: &str) -> User {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO users (id, username, email, hashed_password, display_name, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(hash(TEST_PASSWORD, 4).unwrap())
    .bind(username)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();

    find_user(pool, &id).await.unwrap().unwrap()
}

/// Inserts a published post authored by `author` and returns its id.
pub async fn seed_post(pool: &SqlitePool, author: &User, slug: &str) -> String {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO posts (id, title, slug, content, is_published, published_at, created_at) VALUES (?, ?, ?, ?, TRUE, ?, ?)",
    )
    .bind(&id)
    .bind(slug)
    .bind(slug)
    .bind("<p>seeded</p>")
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO post_authors (post_id, user_id, position) VALUES (?, ?, 0)")
        .bind(&id)
        .bind(&author.id)
        .execute(pool)
        .await
        .unwrap();

    id
}

pub fn bearer(state: &AppState, user: &User) -> String {
    format!("Bearer {}", generate_jwt(&state.config, &user.id).unwrap())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(request).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    auth: Option<String>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

pub async fn send_empty(
    app: Router,
    method: Method,
    uri: &str,
    auth: Option<String>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn get_json(app: Router, uri: &str, auth: Option<String>) -> (StatusCode, Value) {
    send_empty(app, Method::GET, uri, auth).await
}

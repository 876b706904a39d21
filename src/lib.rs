//! Folio backend: blog posts, nested comments, gallery and admin API.

pub mod config;
pub mod db;
pub mod editor;
pub mod error;
pub mod models;
pub mod player;
pub mod routes;
pub mod state;

#[cfg(test)]
mod test_support;

use axum::{Router, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use routes::{
    admin_routes, auth_routes, comments_routes, images_routes, posts_routes, tags_routes,
    users_routes,
};
use state::AppState;

pub fn create_app(state: AppState) -> Router {
    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_dir = state.config.upload_dir.clone();

    // API routes
    let api_routes = Router::new()
        .nest("/api/auth", auth_routes())
        .nest("/api/users", users_routes())
        .nest("/api/posts", posts_routes())
        .nest("/api", comments_routes())
        .nest("/api/tags", tags_routes())
        .nest("/api/images", images_routes())
        .nest("/api/admin", admin_routes())
        .route("/api/health", get(routes::health::health_check));

    Router::new()
        .merge(api_routes)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

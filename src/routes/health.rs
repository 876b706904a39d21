use axum::{Json, extract::State, response::IntoResponse};

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "healthy",
        Err(e) => {
            tracing::warn!("health check query failed: {e}");
            "unhealthy"
        }
    };

    Json(serde_json::json!({"status": "healthy", "database": database}))
}

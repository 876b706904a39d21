use folio_backend::{config::Config, create_app, db, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = db::init_db(&config.database_url).await?;
    tracing::info!("Database initialized");

    if let Some(admin_username) = &config.admin_username {
        if !db::promote_admin(&pool, admin_username).await? {
            tracing::warn!("ADMIN_USERNAME {admin_username} does not match any user yet");
        }
    }

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let addr = config.bind_addr.clone();
    let app = create_app(AppState::new(pool, config));

    tracing::info!("Server running on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

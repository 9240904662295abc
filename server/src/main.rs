//! Keysync Server binary.

use keysync_server::config::Config;
use keysync_server::store::{self, AuthoritativeStore, MemoryStore, PgStore};
use keysync_server::{app, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keysync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Keysync Hub on {}:{}", config.host, config.port);

    let store: Arc<dyn AuthoritativeStore> = match &config.database_url {
        Some(url) => {
            let pool = store::create_pool(url, config.db_max_connections).await?;

            tracing::info!("Running database migrations...");
            store::run_migrations(&pool).await?;

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let app = app(AppState::new(config, store));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

mod config;

use std::sync::Arc;

use tracing::info;

use minichat_api::auth::{AppState, AppStateInner};
use minichat_api::identity::{DevIdentityProvider, GoogleIdentityProvider, IdentityProvider};
use minichat_gateway::dispatcher::Dispatcher;
use minichat_gateway::feed::FeedStore;

use crate::config::{Config, IdentityConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minichat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(minichat_db::Database::open(&config.db_path)?);

    let identity: Arc<dyn IdentityProvider> = match &config.identity {
        IdentityConfig::Google { client_id } => Arc::new(GoogleIdentityProvider::new(client_id.clone())),
        IdentityConfig::Dev => {
            info!("Using dev identity provider; tokens are not verified");
            Arc::new(DevIdentityProvider)
        }
    };

    // Shared state
    let store = FeedStore::new(db, Dispatcher::new());
    let state: AppState = Arc::new(AppStateInner {
        store,
        jwt_secret: config.jwt_secret.clone(),
        session_ttl: config.session_ttl,
        identity,
    });

    let app = minichat_api::router(state);

    info!("Minichat server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use harvest_client::{DefaultCrawlerFactory, FetchConfig, HtmdCleaner, OpenAiCompletion, ReqwestFetcher};
use harvest_core::{CollectionConfig, CollectionOrchestrator, DeepCollectionService};
use harvest_db::{Database, DatabaseConfig};
use harvest_server::routes;
use harvest_server::state::{AppState, DeepService};

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .init();

    let api_key =
        std::env::var("HARVEST_SERVER_API_KEY").context("HARVEST_SERVER_API_KEY must be set")?;
    let port = std::env::var("HARVEST_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let fetch_config = FetchConfig::from_env()?;
    let collections = CollectionOrchestrator::new(
        db.clone(),
        DefaultCrawlerFactory::new(fetch_config.clone()),
        CollectionConfig::default(),
    );
    let deep = deep_service(&db, &fetch_config)?;

    let state = Arc::new(AppState {
        db,
        collections: collections.clone(),
        deep,
        api_key,
    });

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    collections.shutdown();
    Ok(())
}

fn deep_service(db: &Database, fetch_config: &FetchConfig) -> anyhow::Result<Option<DeepService>> {
    let completion = match OpenAiCompletion::from_env() {
        Ok(completion) => completion,
        Err(e) => {
            tracing::warn!(error = %e, "Deep collection disabled");
            return Ok(None);
        }
    };
    let model = completion.model().to_string();

    Ok(Some(DeepCollectionService::new(
        ReqwestFetcher::with_timeout(fetch_config.timeout)?,
        HtmdCleaner::new(),
        completion,
        db.clone(),
        model,
    )))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

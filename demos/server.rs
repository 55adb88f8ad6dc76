//! Example server: loads the model file named by RESOURCE_CONFIG, connects to PostgreSQL,
//! mounts common routes and every configured resource under /api/v1.

use axum::Router;
use resource_controller::{
    common_routes_with_ready, load_from_file, model_routes, resolve, AppState, PgStore, Settings, Store,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resource_controller=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    let config = load_from_file(&settings.resource_config)?;
    let model = Arc::new(resolve(&config)?);
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool, model.clone(), settings.schema_override.clone()));

    let resources = model_routes(store.clone(), model.clone(), |_, options| options)?;
    let state = AppState { store, model };

    let app = Router::new()
        .merge(common_routes_with_ready(state))
        .nest("/api/v1", resources)
        .layer(RequestBodyLimitLayer::new(settings.body_limit));

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

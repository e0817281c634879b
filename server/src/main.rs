mod handlers;
mod state;

use anyhow::{Context, Result};
use common::StoreConfig;
use std::env;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("server=debug,common=info,tower_http=info")),
        )
        .init();

    let cfg = StoreConfig::from_env()?;
    info!(
        "store: {:?} en {} (cache ttl={:?}, policy={:?})",
        cfg.backend,
        cfg.path.display(),
        cfg.cache_ttl,
        cfg.write_policy
    );

    // sin store no hay aplicación: cortamos acá
    let store = match cfg.open_store() {
        Ok(store) => store,
        Err(e) => {
            error!("no se pudo abrir el store: {:#}", e);
            return Err(e);
        }
    };

    let state = AppState::new(store, cfg.write_policy);
    let app = handlers::build_router(state);

    let addr = env::var("KPI_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", addr))?;
    info!("server escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

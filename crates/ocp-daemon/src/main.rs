// SPDX-License-Identifier: MIT OR Apache-2.0

//! Daemon entry point.

use std::sync::Arc;

use ocp_config::CoreConfig;
use ocp_daemon::{AppState, bootstrap_workspace, build_app};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (config, warnings) = CoreConfig::from_env()?;
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }

    let state = Arc::new(AppState::from_config(&config)?);

    if let Some(token) = config.auth_bootstrap_token.as_deref() {
        let session = bootstrap_workspace(&state, "ws_default", Some(token));
        info!(workspace_id = %session.workspace_id, "bootstrap session ready");
    }

    let app = build_app(state);
    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "ops control plane listening");
    axum::serve(listener, app).await?;
    Ok(())
}

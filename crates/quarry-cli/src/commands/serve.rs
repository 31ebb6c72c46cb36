use anyhow::Result;
use tracing::{info, warn};

use quarry_gateway::{start_server, AppState, AuthConfig};

use crate::commands::build_agent;
use crate::config::{secret_or_env, Config};

pub async fn execute(host: String, port: u16, config: &Config) -> Result<()> {
    info!(host = %host, port, "Starting gateway server");

    let agent = build_agent(config)?;
    let token = secret_or_env(&config.gateway.api_token, &["QUARRY_API_TOKEN"]);
    if token.is_none() {
        info!("No API token configured, gateway accepts unauthenticated requests");
    }

    let state = AppState::new(agent.clone(), AuthConfig::new(token), config.gateway.daily_limit)
        .with_allowed_origins(config.gateway.allowed_origins.clone())
        .with_channel_capacity(config.gateway.channel_capacity);

    start_server(state, &host, port).await?;

    // rewrite the table in case a per-directive write failed mid-run
    if let Err(e) = agent.retriever().weights().flush() {
        warn!(error = %e, "Failed to flush model weights on shutdown");
    }
    Ok(())
}

//! Murmur Gateway - Main entry point.

use anyhow::Result;
use murmur_common::config::Config;
use murmur_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.observability.log_level, &config.observability.log_format);

    tracing::info!("Murmur Gateway v{}", env!("CARGO_PKG_VERSION"));

    if config.openai_api_key().is_none() {
        tracing::warn!("No OpenAI API key configured; chat requests will be rejected");
    }

    // Start the gateway server
    murmur_gateway::start_server(&config).await
}

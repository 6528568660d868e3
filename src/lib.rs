// Chat Relay - OpenAI-compatible front for DeepSeek, OpenRouter and Ollama

pub mod api;
pub mod config;
pub mod error;
pub mod proxy;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub async fn run() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = config::Cli::parse();
    let mut app_config = config::AppConfig::load(cli.config.as_deref())?;
    app_config.apply_cli(&cli);

    let relay_config = app_config.resolve(|name| std::env::var(name).ok())?;
    tracing::debug!("Resolved config: {:?}", relay_config);

    if relay_config.api_keys.is_empty() {
        tracing::warn!("No API keys configured, accepting unauthenticated requests");
    }
    tracing::info!(
        "Using provider {} ({}) with models: {}",
        relay_config.provider.name,
        relay_config.provider.chat_url(),
        relay_config
            .provider
            .models
            .iter()
            .map(|(alias, upstream)| format!("{} -> {}", alias, upstream))
            .collect::<Vec<_>>()
            .join(", ")
    );

    api::start_server(relay_config).await
}

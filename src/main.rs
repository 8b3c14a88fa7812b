//! Chatbot - server-rendered chat front-end

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatbot::{
    api::{self, AppState},
    config::Config,
    pages::PageRenderer,
    services::{ChatService, GoTrueClient, OpenAiCompletionClient, PostgrestChatStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatbot=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chatbot...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    let config = config.validate()?;
    tracing::info!("Configuration loaded");

    // External service clients
    let http = reqwest::Client::builder()
        .user_agent(concat!("chatbot/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let auth = GoTrueClient::new(http.clone(), &config.backend_url, config.anon_key.clone())?;
    let completion = OpenAiCompletionClient::new(http.clone(), &config.completion)?;
    let store = PostgrestChatStore::new(http, &config.backend_url, config.anon_key.clone())?;
    tracing::info!("Auth provider at {}", config.backend_url);

    let pages = PageRenderer::new()?;
    tracing::info!("Page templates loaded");

    let origin = config.origin();
    let addr = format!("{}:{}", config.host, config.port);

    // Build application state
    let state = AppState {
        config: Arc::new(config),
        auth: Arc::new(auth),
        chat_service: Arc::new(ChatService::new(Arc::new(completion), Arc::new(store))),
        pages: Arc::new(pages),
    };

    // Build router
    let app = api::build_router(state, &origin);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

use agent_kit::api::{create_router, AppState};
use agent_kit::application::ChatService;
use agent_kit::domain::clock::system_clock;
use agent_kit::infrastructure::{AnthropicLlm, AppConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let fmt_layer = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt::layer().json().boxed(),
        _ => tracing_subscriber::fmt::layer().boxed(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=debug,agent_kit=debug,tower_http=debug".into()),
        )
        .with(fmt_layer)
        .init();

    let config = AppConfig::load()?;
    info!(model = %config.llm.model, agent = %config.agent.id, "Configuration loaded");

    let shutdown = CancellationToken::new();
    let llm = Arc::new(AnthropicLlm::from_config(&config.llm));
    let chat = Arc::new(
        ChatService::new(llm, &config, system_clock()).with_cancellation(shutdown.clone()),
    );
    let maintenance = chat.spawn_maintenance(
        Duration::from_secs(config.memory.sweep_interval_seconds.max(1)),
        shutdown.clone(),
    );

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let app = create_router(AppState::new(chat, config));

    info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    maintenance.await?;
    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    token.cancel();
}

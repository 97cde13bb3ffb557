use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use smartnotes::{
    api::routes::create_router,
    captcha::{Turnstile, TurnstileConfig},
    config::Config,
    gateway::GenerationGateway,
    llm::OpenAiClient,
    tokens::Cl100kEstimator,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let server_addr = config.server_addr;

    let mut turnstile_config = TurnstileConfig::new(config.turnstile_secret.clone());
    turnstile_config.expected_hostname = config.turnstile_hostname.clone();
    let captcha = Turnstile::new(turnstile_config)?;

    let generator = OpenAiClient::new(config.api_key.clone(), config.openai_base_url.clone())?;
    let estimator = Cl100kEstimator::new();
    estimator.preload()?;

    let gateway = GenerationGateway::new(
        Arc::new(generator),
        Arc::new(estimator),
        config.rate_limit_interval,
        config.token_limit,
    );

    tracing::info!(
        token_limit = config.token_limit,
        window = ?config.rate_limit_interval,
        "Token budget configured"
    );

    let app_state = AppState {
        config: Arc::new(config),
        captcha: Arc::new(captcha),
        gateway: Arc::new(gateway),
    };

    let app = create_router(app_state);
    let listener = TcpListener::bind(server_addr).await?;

    tracing::info!(%server_addr, "Listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

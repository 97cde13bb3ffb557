use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
    extract::{rejection::JsonRejection, ConnectInfo, Json, State},
    http::StatusCode,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, Result};
use crate::api::models::{GenerateRequest, HealthStatus};
use crate::api::response::{self, ApiResponse};
use crate::models::{GenerationRequest, GenerationResult};
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health_handler() -> (StatusCode, Json<ApiResponse<HealthStatus>>) {
    response::success(HealthStatus { status: "ok" })
}

async fn generate_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<GenerationResult>>)> {
    let Json(req) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected generate request body");
        AppError::InvalidInput
    })?;

    let remote_ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    match state.captcha.verify(&req.captcha_token, remote_ip.as_deref()).await {
        Ok(true) => {}
        Ok(false) => return Err(AppError::CaptchaFailure),
        Err(err) => {
            tracing::error!(error = %err, "Captcha verification failed");
            return Err(AppError::CaptchaFailure);
        }
    }

    let request = GenerationRequest::from(req);
    if request.is_empty_selection() {
        return Err(AppError::NoOptionsSelected);
    }

    let start_time = std::time::Instant::now();
    let cancel = CancellationToken::new();
    let deadline = tokio::spawn({
        let cancel = cancel.clone();
        let timeout = state.config.request_timeout;
        async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        }
    });
    let result = state.gateway.generate(&cancel, &request).await;
    deadline.abort();

    match result {
        Ok(generated) => {
            tracing::info!(id = %generated.id, elapsed = ?start_time.elapsed(), "Generated study material");
            Ok(response::success(generated))
        }
        Err(err) => {
            tracing::warn!(error = %err, elapsed = ?start_time.elapsed(), "Generation failed");
            Err(err.into())
        }
    }
}

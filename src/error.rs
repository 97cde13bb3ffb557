use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};

use crate::api::response;

/// Errors produced by [`crate::gateway::GenerationGateway::generate`].
///
/// Display strings are user-facing; underlying causes are logged where they
/// occur and never carried in the variant.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("failed to estimate tokens")]
    EstimationFailed,

    #[error("rate limit reached, please try again later: used {used} / {limit} tokens in current window")]
    RateLimitExceeded { used: usize, limit: usize },

    #[error("AI service is currently unavailable")]
    ProviderUnavailable,

    #[error("generation was cancelled")]
    Cancelled,

    #[error("failed to process AI response")]
    MalformedProviderResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid JSON format.")]
    InvalidInput,

    #[error("We could not confirm you are human")]
    CaptchaFailure,

    #[error("You have to choose 1 option at least to generate.")]
    NoOptionsSelected,

    #[error("We were unable to generate the response: {0}")]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput | AppError::CaptchaFailure | AppError::NoOptionsSelected => {
                StatusCode::BAD_REQUEST
            }
            AppError::Generation(err) => match err {
                GenerationError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                GenerationError::ProviderUnavailable
                | GenerationError::MalformedProviderResponse => StatusCode::BAD_GATEWAY,
                GenerationError::Cancelled => StatusCode::REQUEST_TIMEOUT,
                GenerationError::EstimationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        response::error::<()>(status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

pub mod api;
pub mod captcha;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod models;
pub mod schema;
pub mod tokens;
pub mod usage;

use std::sync::Arc;
use config::Config;
use captcha::CaptchaVerifier;
use gateway::GenerationGateway;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub gateway: Arc<GenerationGateway>,
}

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

pub const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

const MAX_BODY_BYTES: usize = 1 << 20;
const MAX_CHALLENGE_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("empty token")]
    EmptyToken,

    #[error("invalid remote IP: {0}")]
    InvalidRemoteIp(String),

    #[error("turnstile request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("turnstile bad status: {0}")]
    BadStatus(u16),

    #[error("turnstile response too large")]
    BodyTooLarge,

    #[error("invalid JSON from turnstile: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("turnstile verification failed: {0:?}")]
    Rejected(Vec<String>),

    #[error("hostname mismatch: got {got}, expected {expected}")]
    HostnameMismatch { got: String, expected: String },

    #[error("invalid challenge_ts: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("challenge timestamp too old")]
    StaleChallenge,
}

/// Human-presence check run before any generation work.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, CaptchaError>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default)]
    challenge_ts: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TurnstileConfig {
    pub secret: String,
    pub site_verify_url: String,
    pub expected_hostname: Option<String>,
}

impl TurnstileConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            site_verify_url: TURNSTILE_VERIFY_URL.to_string(),
            expected_hostname: None,
        }
    }
}

/// Cloudflare Turnstile siteverify client.
pub struct Turnstile {
    config: TurnstileConfig,
    client: Client,
}

impl Turnstile {
    pub fn new(config: TurnstileConfig) -> Result<Self, CaptchaError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { config, client })
    }

    fn check_response(&self, response: SiteVerifyResponse, now: DateTime<Utc>) -> Result<bool, CaptchaError> {
        if !response.success {
            return Err(CaptchaError::Rejected(response.error_codes));
        }

        if let Some(expected) = &self.config.expected_hostname {
            let got = response.hostname.unwrap_or_default();
            if &got != expected {
                return Err(CaptchaError::HostnameMismatch {
                    got,
                    expected: expected.clone(),
                });
            }
        }

        if let Some(ts) = response.challenge_ts.filter(|ts| !ts.is_empty()) {
            let issued = DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc);
            let age = now.signed_duration_since(issued);
            if age.to_std().is_ok_and(|age| age > MAX_CHALLENGE_AGE) {
                return Err(CaptchaError::StaleChallenge);
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl CaptchaVerifier for Turnstile {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, CaptchaError> {
        if token.is_empty() {
            return Err(CaptchaError::EmptyToken);
        }

        let mut form = vec![("secret", self.config.secret.as_str()), ("response", token)];
        if let Some(ip) = remote_ip.filter(|ip| !ip.is_empty()) {
            if ip.parse::<IpAddr>().is_err() {
                return Err(CaptchaError::InvalidRemoteIp(ip.to_string()));
            }
            form.push(("remoteip", ip));
        }

        let res = self
            .client
            .post(&self.config.site_verify_url)
            .form(&form)
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            return Err(CaptchaError::BadStatus(res.status().as_u16()));
        }

        let body = res.bytes().await?;
        if body.len() > MAX_BODY_BYTES {
            return Err(CaptchaError::BodyTooLarge);
        }

        let response: SiteVerifyResponse = serde_json::from_slice(&body)?;
        self.check_response(response, Utc::now())
    }
}

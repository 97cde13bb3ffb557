use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use crate::error::{AppError, Result};
use crate::llm::DEFAULT_BASE_URL;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub api_key: String,
    pub openai_base_url: String,
    pub turnstile_secret: String,
    pub turnstile_hostname: Option<String>,
    pub rate_limit_interval: Duration,
    pub token_limit: usize,
    pub request_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::ConfigError(format!("{} must be set", key)))
        };

        let api_key = required("API_KEY")?;
        let turnstile_secret = required("TURNSTILE_SECRET")?;

        // Only listen publicly when explicitly opened up
        let open = parse_or(&lookup, "OPEN", false)?;
        let ip = if open { IpAddr::V4(Ipv4Addr::UNSPECIFIED) } else { IpAddr::V4(Ipv4Addr::LOCALHOST) };
        let port = parse_or::<u16, _>(&lookup, "PORT", 3000)?;

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            api_key,
            openai_base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            turnstile_secret,
            turnstile_hostname: lookup("TURNSTILE_HOSTNAME").filter(|v| !v.is_empty()),
            rate_limit_interval: Duration::from_secs(parse_or(&lookup, "RATELIMIT_INTERVAL", 0)?),
            token_limit: parse_or(&lookup, "TOKEN_LIMIT", 0)?,
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT", 90)?),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "INR", "AUD", "CAD", "CHF", "SEK", "NOK", "DKK", "SGD",
    "HKD", "KRW", "ZAR", "BRL", "MXN", "TRY",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FREECURRENCY_API_KEY not set. Please put it in .env")]
    MissingApiKey,
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base_url: String,
    pub base_currency: String,
    pub start_year: i32,
    pub data_dir: PathBuf,
    pub max_per_minute: usize,
    pub safety_buffer: u64,
    pub allow_partial_month: bool,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub request_timeout: Duration,
    pub currencies: Vec<String>,
    pub lock_timeout: Duration,
}

impl Config {
    /// Read configuration from the environment (a `.env` file is loaded by
    /// main before this runs). Every variable except the API key has a
    /// default matching the deployed tool.
    pub fn from_env() -> Result<Config, ConfigError> {
        let api_key = env::var("FREECURRENCY_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let currencies = match env::var("CURRENCIES") {
            Ok(list) => list
                .split(',')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
            Err(_) => DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
        };

        Ok(Config {
            api_key,
            api_base_url: env_or("API_BASE_URL", "https://api.freecurrencyapi.com/v1"),
            base_currency: env_or("BASE_CURRENCY", "USD").to_uppercase(),
            start_year: parse_var("START_YEAR", 2023)?,
            data_dir: PathBuf::from(env_or("DATA_DIR", "/data")),
            max_per_minute: parse_var("MAX_REQUESTS_PER_MINUTE", 10)?,
            safety_buffer: parse_var("SAFETY_BUFFER", 1)?,
            allow_partial_month: flag_var("ALLOW_PARTIAL_MONTH"),
            max_retries: parse_var("MAX_RETRIES", 4)?,
            retry_base: Duration::from_secs_f64(parse_var("RETRY_BASE_SECONDS", 1.0)?),
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT", 30)?),
            currencies,
            lock_timeout: Duration::from_secs_f64(parse_var("FILELOCK_TIMEOUT", 10.0)?),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn flag_var(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

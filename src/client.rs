use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{error, info, warn};
use reqwest::{Response, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;

use crate::config::Config;
use crate::model::{DailyRateRecord, QuotaStatus};
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("API returned 429: rate/quota exceeded")]
    QuotaExhausted,
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("unexpected response payload: {0}")]
    BadPayload(String),
}

/// The remote rate-quote API, seen through the two operations this tool
/// needs. The scheduler is generic over this so tests can substitute an
/// in-memory source.
#[async_trait]
pub trait RateSource {
    /// Monthly quota snapshot; does not consume quota.
    async fn quota_status(&self) -> Result<QuotaStatus, FetchError>;

    /// Rates for one date against the base currency; consumes one quota unit.
    async fn historical(&self, date: NaiveDate) -> Result<DailyRateRecord, FetchError>;
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    quotas: Quotas,
}

#[derive(Deserialize, Default)]
struct Quotas {
    #[serde(default)]
    month: MonthQuota,
}

#[derive(Deserialize, Default)]
struct MonthQuota {
    total: Option<u64>,
    used: Option<u64>,
    remaining: Option<u64>,
}

#[derive(Deserialize)]
struct HistoricalBody {
    #[serde(default)]
    data: HashMap<String, HashMap<String, f64>>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    base_currency: String,
    currencies: Vec<String>,
    max_retries: u32,
    retry_base: std::time::Duration,
    limiter: RateLimiter,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            api_key: config.api_key.clone(),
            base_currency: config.base_currency.clone(),
            currencies: config.currencies.clone(),
            max_retries: config.max_retries,
            retry_base: config.retry_base,
            limiter: RateLimiter::new(config.max_per_minute),
        })
    }

    /// GET with bounded retry. Transport failures and HTTP 5xx are retried
    /// with exponential backoff; 429 and every other status are returned
    /// as-is for the caller to classify. When `counts_against_quota`, the
    /// call waits for a rate-limiter slot before sending and records its
    /// timestamp once a response is obtained.
    async fn request(
        &self,
        path: &str,
        params: &[(&str, String)],
        counts_against_quota: bool,
    ) -> Result<Response, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if counts_against_quota {
                self.limiter.acquire_slot().await;
            }
            let sent = self
                .http
                .get(&url)
                .query(params)
                .header("apikey", &self.api_key)
                .send()
                .await;
            let resp = match sent {
                Ok(resp) => resp,
                Err(err) => {
                    warn!("Request exception on attempt {}: {}", attempt, err);
                    if attempt <= self.max_retries {
                        let backoff = self.backoff(attempt);
                        info!("Retrying in {:.1}s...", backoff.as_secs_f64());
                        sleep(backoff).await;
                        continue;
                    }
                    return Err(FetchError::Transport(err));
                }
            };
            if counts_against_quota {
                self.limiter.record().await;
            }
            if resp.status().is_server_error() && attempt <= self.max_retries {
                let backoff = self.backoff(attempt);
                warn!(
                    "Server error {}. Retry {}/{} in {:.1}s",
                    resp.status(),
                    attempt,
                    self.max_retries,
                    backoff.as_secs_f64()
                );
                sleep(backoff).await;
                continue;
            }
            return Ok(resp);
        }
    }

    fn backoff(&self, attempt: u32) -> std::time::Duration {
        self.retry_base * 2u32.pow(attempt - 1)
    }
}

#[async_trait]
impl RateSource for ApiClient {
    async fn quota_status(&self) -> Result<QuotaStatus, FetchError> {
        let resp = self.request("/status", &[], false).await?;
        let status = resp.status();
        if status != StatusCode::OK {
            error!("Status endpoint returned {}", status);
            return Err(FetchError::Status(status));
        }
        let body: StatusBody = resp
            .json()
            .await
            .map_err(|e| FetchError::BadPayload(e.to_string()))?;
        Ok(QuotaStatus {
            total: body.quotas.month.total,
            used: body.quotas.month.used,
            remaining: body.quotas.month.remaining,
        })
    }

    async fn historical(&self, date: NaiveDate) -> Result<DailyRateRecord, FetchError> {
        let date_iso = date.format("%Y-%m-%d").to_string();
        let params = [
            ("date", date_iso.clone()),
            ("base_currency", self.base_currency.clone()),
            ("currencies", self.currencies.join(",")),
        ];
        let resp = self.request("/historical", &params, true).await?;
        match resp.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                error!("API returned 429 for date {}", date_iso);
                return Err(FetchError::QuotaExhausted);
            }
            other => {
                error!("Non-200 from historical for {}: {}", date_iso, other);
                return Err(FetchError::Status(other));
            }
        }
        let body: HistoricalBody = resp
            .json()
            .await
            .map_err(|e| FetchError::BadPayload(e.to_string()))?;
        let day = body.data.get(&date_iso).cloned().unwrap_or_default();
        Ok(record_from_day(
            date,
            &day,
            &self.currencies,
            &self.base_currency,
        ))
    }
}

/// Shape one day's API payload into a record over the configured currency
/// set. Codes the API omitted become the blank sentinel; the base currency
/// always quotes at exactly 1 against itself.
fn record_from_day(
    date: NaiveDate,
    day: &HashMap<String, f64>,
    currencies: &[String],
    base_currency: &str,
) -> DailyRateRecord {
    let mut rates: BTreeMap<String, Option<Decimal>> = BTreeMap::new();
    for code in currencies {
        rates.insert(code.clone(), day.get(code).and_then(|v| Decimal::from_f64(*v)));
    }
    rates.insert(base_currency.to_string(), Some(Decimal::ONE));
    DailyRateRecord { date, rates }
}

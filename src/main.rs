use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use log::{error, info};

use archive::ArchiveStore;
use client::ApiClient;
use config::{Config, ConfigError};
use model::RunOutcome;
use scheduler::Scheduler;

mod archive;
mod budget;
mod calendar;
mod client;
mod config;
mod lock;
mod locator;
mod model;
mod rate_limiter;
mod scheduler;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err @ ConfigError::MissingApiKey) => {
            eprintln!("{}", err);
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            return ExitCode::from(2);
        }
    };

    match run(&config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

async fn run(config: &Config) -> Result<RunOutcome> {
    info!(
        "Starting ratefill (base={}). Allow partial={}",
        config.base_currency, config.allow_partial_month
    );
    std::fs::create_dir_all(&config.data_dir)?;

    let client = ApiClient::new(config)?;
    let store = ArchiveStore::new(&config.data_dir, config.currencies.clone());
    Scheduler::new(config, &client, &store)
        .run(Utc::now().date_naive())
        .await
}

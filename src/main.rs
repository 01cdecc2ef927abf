#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod bot;
mod cli;
mod config;
mod db;
mod deepseek;
mod gateway;
mod green_api;
mod resilience;
mod utils;
mod web;

use bot::BotCore;
use cli::{Cli, Command};
use config::Config;
use deepseek::{DeepSeekClient, LanguageModel};
use green_api::GreenApiClient;
use resilience::health::{DatabaseProbe, GreenApiProbe, RedisProbe};
use resilience::{DeadLetterQueue, HealthChecker};
use web::metrics::Metrics;
use web::{AppState, WebServer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    utils::logging::init_tracing(&config.logging);

    if cli.command() == Command::CheckConfig {
        info!(path = %cli.config.display(), "Configuration is valid");
        return Ok(());
    }

    let db = db::DatabaseManager::new(&config.database).await?;
    db.migrate().await?;
    if cli.command() == Command::Migrate {
        info!("Database migrations applied");
        return Ok(());
    }

    info!("whatsapp hotel bot starting up");
    Metrics::start();

    let dead_letters: Arc<dyn DeadLetterQueue> = Arc::from(resilience::dead_letter::from_config(&config.redis)?);
    info!(backend = dead_letters.backend(), "Dead letter queue ready");

    let gateway = Arc::new(GreenApiClient::new(&config.green_api)?);
    let deepseek = DeepSeekClient::new(&config.deepseek)?;
    let model: Option<Arc<dyn LanguageModel>> = if deepseek.is_configured() {
        Some(Arc::new(deepseek))
    } else {
        warn!("DeepSeek API key not set, sentiment and replies use the fallbacks");
        None
    };

    let (bot, workers) = BotCore::new(&config, db.clone(), gateway.clone(), model, dead_letters.clone());

    let mut health = HealthChecker::new(&config.health)
        .with_probe(Arc::new(DatabaseProbe::new(db.clone())))
        .with_probe(Arc::new(GreenApiProbe::new(gateway, db.clone())))
        .with_dead_letters(dead_letters.clone());
    if config.redis.url.as_deref().is_some_and(|url| !url.is_empty()) {
        health = health.with_probe(Arc::new(RedisProbe::new(dead_letters)));
    }
    for breaker in bot.breakers() {
        health = health.with_breaker(breaker);
    }

    let state = AppState {
        db,
        bot,
        health: Arc::new(health),
    };
    let web_server = WebServer::new(&config.server, state, config.green_api.webhook_token.clone());

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });
    let workers_handle = tokio::spawn(workers.run());

    tokio::select! {
        _ = web_handle => {},
        _ = workers_handle => {},
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for shutdown signal: {}", e);
            }
        }
    }

    info!("whatsapp hotel bot shutting down");
    Ok(())
}

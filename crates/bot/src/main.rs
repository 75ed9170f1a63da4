mod config;
mod dispatch;
mod event;
mod idempotency;
mod logging;
mod plugins;
mod server;
mod slack;
mod storage;
mod tokenizer;
mod translate;

use core::time::Duration;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use clap::Parser;
use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use tracing::{info, warn};

use plugin_core::{
    PluginContext, dates,
    services::{MemoryTable, RecordTable, Translator},
};

use crate::{
    config::{BotConfig, Settings, load_config},
    dispatch::Dispatcher,
    event::Gate,
    idempotency::IdempotencyGuard,
    logging::init_tracing,
    server::AppState,
    slack::SlackClient,
    storage::{FileTable, FsObjectStore},
    translate::{HttpTranslator, UnconfiguredTranslator},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present so clap can pick up env vars.
    let _ = dotenvy::dotenv();
    let settings = Settings::parse();
    init_tracing(settings.debug_log)?;

    let config = load_config(&settings.config)?;
    let state = wire(&settings, &config).await?;
    server::serve(&settings.listen, state).await
}

fn record_table(path: Option<&std::path::Path>, name: &str) -> Arc<dyn RecordTable> {
    if let Some(path) = path {
        info!(table = name, file = %path.display(), "Using file-backed table");
        Arc::new(FileTable::new(path))
    } else {
        info!(table = name, "Using in-memory table");
        Arc::new(MemoryTable::new())
    }
}

fn signing_key(secret: Option<&str>) -> Vec<u8> {
    match secret.filter(|s| !s.is_empty()) {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            warn!("OBJECT_SIGNING_SECRET unset; object links stop working on restart");
            rand::thread_rng().r#gen::<[u8; 32]>().to_vec()
        }
    }
}

async fn wire(settings: &Settings, config: &BotConfig) -> Result<AppState> {
    if settings.object_retention_days <= 0 {
        bail!("OBJECT_RETENTION_DAYS must be positive");
    }
    let timeout = Duration::from_millis(settings.http_timeout_ms.max(1));

    let chat = Arc::new(SlackClient::new(
        &settings.slack_api_base,
        &settings.slack_token,
        timeout,
    )?);
    let translator: Arc<dyn Translator> = match settings.translate_api_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Arc::new(HttpTranslator::new(
            url,
            settings.translate_api_key.clone(),
            timeout,
        )?),
        _ => {
            info!("No translation endpoint configured; translate will report an error");
            Arc::new(UnconfiguredTranslator)
        }
    };
    let objects = Arc::new(FsObjectStore::new(
        settings.object_dir.clone(),
        &settings.api_base_url,
        dates::days(settings.object_retention_days)?,
        signing_key(settings.object_signing_secret.as_deref()),
    )?);
    let urls = record_table(settings.url_table.as_deref(), "urls");
    let mutex = record_table(settings.mutex_table.as_deref(), "mutex");

    let rng = Arc::new(Mutex::new(StdRng::from_entropy()));
    let registry = plugins::build_registry(config, &settings.plugins_dir, rng).await;

    let ctx = PluginContext {
        chat,
        translator,
        objects: Arc::clone(&objects) as _,
        urls: Arc::clone(&urls),
        registry,
        public_base_url: Arc::from(settings.api_base_url.as_str()),
        display_offset: config.display_offset()?,
    };

    Ok(AppState {
        gate: Arc::new(Gate {
            verification_token: settings.verification_token.clone(),
            channel: settings.channel_id.clone(),
        }),
        guard: IdempotencyGuard::new(mutex),
        dispatcher: Dispatcher::new(ctx),
        urls,
        objects,
    })
}

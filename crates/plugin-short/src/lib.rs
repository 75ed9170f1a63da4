use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use plugin_core::{
    ParsedCommand, Plugin, PluginContext, PluginSpec, dates,
    factory::PluginFactory,
    reply::{Outcome, Reply},
    services::TableItem,
    str_config,
};

const TTL_FLAG: &str = "--ttl";
const ID_LEN: usize = 8;

#[derive(Debug)]
pub struct ShortPlugin;

impl PluginFactory for ShortPlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        if !specs.iter().any(|s| s.id == "short") {
            specs.push(PluginSpec::new("short", &["short"]));
        }
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(Short)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ShortConfig {
    default_ttl_days: i64,
}

impl Default for ShortConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: 1,
        }
    }
}

#[derive(Debug)]
pub struct Short;

#[async_trait]
impl Plugin for Short {
    fn id(&self) -> &'static str {
        "short"
    }

    fn help(&self) -> &'static str {
        ":book: *short*\n```DESCRIPTION: \n • Generate a shortened URL\nSYNOPSIS: \n • @hitter short <URL> <Options>\nOPTIONS: \n • --ttl <Expiry Days>\nEXAMPLES: \n • @hitter short https://aws.amazon.com/jp/\n • @hitter short https://aws.amazon.com/jp/ --ttl 7\n```"
    }

    async fn run(&self, ctx: &PluginContext, cmd: &ParsedCommand, spec: &PluginSpec) -> Result<()> {
        let cfg: ShortConfig = serde_yaml::from_value(spec.config.clone()).unwrap_or_default();
        let target = cmd.argument.trim();
        if target.is_empty() {
            bail!("There is no URL to shorten");
        }

        let id = short_id();
        let base = str_config(spec, "base_url").unwrap_or_else(|| ctx.public_base_url.to_string());
        let short_url = join_id(&base, &id)?;
        let days = ttl_days(cmd, cfg.default_ttl_days);

        let item = TableItem::new(id.as_str(), OffsetDateTime::now_utc(), dates::days(days)?)?
            .with_url(target);
        let expires_at = item.expires_at()?;
        ctx.urls
            .put_record(item)
            .await
            .context("storing short URL")?;
        info!(id = %id, days, "Stored short URL");

        let reply = Reply::new(&cmd.from, Outcome::Success)
            .with_command(&cmd.text, &cmd.event_ts, ctx.display_offset)
            .with_results(&format!(
                ":link: {short_url}\n\n:clock930: {}\n\n> :globe_with_meridians: _If you want to change the expiry date, please try again._",
                dates::display_date(expires_at, ctx.display_offset)
            ));
        ctx.chat.post_message(&cmd.channel, &reply).await?;
        Ok(())
    }
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().to_string();
    id.truncate(ID_LEN);
    id
}

fn ttl_days(cmd: &ParsedCommand, default: i64) -> i64 {
    cmd.first_option(TTL_FLAG)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|d| *d > 0)
        .unwrap_or(default)
}

fn join_id(base: &str, id: &str) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("invalid base URL {base}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("base URL {base} cannot carry a path"))?
        .pop_if_empty()
        .push(id);
    Ok(url.into())
}

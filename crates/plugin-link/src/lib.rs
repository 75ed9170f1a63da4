use std::{fmt::Write as _, sync::Arc};

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info};
use uuid::Uuid;

use plugin_core::{
    ParsedCommand, Plugin, PluginContext, PluginSpec, dates,
    factory::PluginFactory,
    reply::{Outcome, Reply},
    services::{FileUpload, PresignedUrl, StoredObject},
};

#[derive(Debug)]
pub struct LinkPlugin;

impl PluginFactory for LinkPlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        if !specs.iter().any(|s| s.id == "link") {
            specs.push(PluginSpec::new("link", &["link"]));
        }
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(Link)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LinkConfig {
    default_minutes: i64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_minutes: 15,
        }
    }
}

#[derive(Debug)]
struct SharedFile {
    object: StoredObject,
    url: PresignedUrl,
}

#[derive(Debug)]
pub struct Link;

#[async_trait]
impl Plugin for Link {
    fn id(&self) -> &'static str {
        "link"
    }

    fn help(&self) -> &'static str {
        ":book: *link*\n```DESCRIPTION: \n • Upload the attached file to object storage and generate a pre-signed URL\nSYNOPSIS: \n • @hitter link <Expiry Minutes> <Files>\nEXAMPLES: \n • @hitter link <file1>\n • @hitter link 15 <fileA, fileB>\n```"
    }

    async fn run(&self, ctx: &PluginContext, cmd: &ParsedCommand, spec: &PluginSpec) -> Result<()> {
        let cfg: LinkConfig = serde_yaml::from_value(spec.config.clone()).unwrap_or_default();
        if cmd.files.is_empty() {
            bail!("There are no attached files to link");
        }
        let minutes = expiry_minutes(cmd, cfg.default_minutes);
        let valid_for = dates::minutes(minutes)?;
        // Reject before anything is stored.
        dates::expiry_after(OffsetDateTime::now_utc(), valid_for)?;
        let prefix = Uuid::new_v4();

        let mut shared = Vec::with_capacity(cmd.files.len());
        for (download_url, name) in &cmd.files {
            debug!(download_url = %download_url, name = %name, "Fetching attachment");
            let body = ctx
                .chat
                .download_file(download_url)
                .await
                .with_context(|| format!("downloading {name}"))?;
            let key = format!("{prefix}/{name}");
            let object = ctx.objects.put_object(&key, body).await?;
            let url = ctx.objects.presign_get(&key, valid_for).await?;
            shared.push(SharedFile { object, url });
        }
        info!(files = shared.len(), minutes, "Stored attachments");

        let names: Vec<&str> = cmd.files.values().map(String::as_str).collect();
        let count = if shared.len() > 1 {
            format!("{} files ", shared.len())
        } else {
            String::new()
        };
        let reply = Reply::new(&cmd.from, Outcome::Success)
            .with_command(
                &format!("{} <{}>", cmd.text, names.join(", ")),
                &cmd.event_ts,
                ctx.display_offset,
            )
            .with_results(&format!(
                ":linked_paperclips: {count}object information and pre-signed URL\n\n`Please check the file attached to the thread for details of the link command results.`\n\n> :satellite_antenna: _If you want to change the expiry date, please try again._"
            ));
        let posted = ctx.chat.post_message(&cmd.channel, &reply).await?;

        let posted_at = dates::parse_event_ts(&posted.ts).unwrap_or_else(OffsetDateTime::now_utc);
        ctx.chat
            .upload_file(FileUpload {
                filename: format!(
                    "{}_link_command_result.text",
                    dates::file_name_date(posted_at, ctx.display_offset)
                ),
                comment: ":linked_paperclips: This file is the result of the link command.\n"
                    .to_owned(),
                content: render_details(&shared, ctx.display_offset).into_bytes(),
                channel: posted.channel,
                thread_ts: posted.ts,
            })
            .await
    }
}

fn expiry_minutes(cmd: &ParsedCommand, default: i64) -> i64 {
    cmd.numeric_argument().filter(|m| *m > 0).unwrap_or(default)
}

fn render_details(shared: &[SharedFile], offset: UtcOffset) -> String {
    let mut body = String::new();
    for (i, file) in shared.iter().enumerate() {
        let object_expiry = file
            .object
            .expires_at
            .map_or_else(|| "none".to_owned(), |at| dates::display_date(at, offset));
        let _ = write!(
            body,
            "• [{n}]: Object information and pre-signed URL\n\n\nObject: \n • location: \n      {location}\n\n • key: \n      {key}\n\n • expiry date: \n      {object_expiry}\n\n\nPre-Signed URL: \n • URL: \n      {url}\n\n • expiry date: \n      {url_expiry}\n\n\n\n",
            n = i + 1,
            location = file.object.location,
            key = file.object.key,
            url = file.url.url,
            url_expiry = dates::display_date(file.url.expires_at, offset),
        );
    }
    body
}

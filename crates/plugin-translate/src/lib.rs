use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;

use plugin_core::{
    ParsedCommand, Plugin, PluginContext, PluginSpec, dates,
    factory::PluginFactory,
    reply::{Outcome, Reply},
    services::FileUpload,
};

#[derive(Debug)]
pub struct TranslatePlugin;

impl PluginFactory for TranslatePlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        if !specs.iter().any(|s| s.id == "translate") {
            specs.push(PluginSpec::new("translate", &["translate"]));
        }
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(Translate)
    }
}

/// Text in `primary` goes to `secondary`; anything else goes to `primary`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TranslateConfig {
    primary: String,
    secondary: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            primary: "ja".to_owned(),
            secondary: "en".to_owned(),
        }
    }
}

impl TranslateConfig {
    fn target_for(&self, source: &str) -> &str {
        if source == self.primary {
            &self.secondary
        } else {
            &self.primary
        }
    }
}

#[derive(Debug)]
pub struct Translate;

#[async_trait]
impl Plugin for Translate {
    fn id(&self) -> &'static str {
        "translate"
    }

    fn help(&self) -> &'static str {
        ":book: *translate*\n```DESCRIPTION: \n • Translates the input text\nSYNOPSIS: \n • @hitter translate <Text>\nEXAMPLES: \n • @hitter translate AWS is the world’s most comprehensive and broadly adopted cloud platform\n • @hitter translate AWS は、世界で最も包括的で広く採用されているクラウドプラットフォームです\n```"
    }

    async fn run(&self, ctx: &PluginContext, cmd: &ParsedCommand, spec: &PluginSpec) -> Result<()> {
        let cfg: TranslateConfig = serde_yaml::from_value(spec.config.clone()).unwrap_or_default();
        let text = cmd.argument.trim();
        if text.is_empty() {
            bail!("There is no text to translate");
        }

        let source = ctx.translator.detect_language(text).await?;
        let target = cfg.target_for(&source).to_owned();
        let translated = ctx.translator.translate_text(text, &source, &target).await?;
        info!(source = %source, target = %target, chars = text.chars().count(), "Translated text");

        let reply = Reply::new(&cmd.from, Outcome::Success)
            .with_command(&cmd.text, &cmd.event_ts, ctx.display_offset)
            .with_results(&format!(
                ":dart: Translated the text from *[{source}]* to *[{target}]*\n\n`Please check the file attached to the thread for details of the translation command results.`\n\n> :zap: _If there is a problem with the translation, please check the input text and try again._"
            ));
        let posted = ctx.chat.post_message(&cmd.channel, &reply).await?;

        let body = format!(
            "• Source text: [{source}]\n\n{text}\n\n\n\n• Translated text: [{target}]\n\n{translated}\n"
        );
        let posted_at = dates::parse_event_ts(&posted.ts).unwrap_or_else(OffsetDateTime::now_utc);
        ctx.chat
            .upload_file(FileUpload {
                filename: format!(
                    "{}_translate_command_result.text",
                    dates::file_name_date(posted_at, ctx.display_offset)
                ),
                comment: ":dart: This file is the result of the translation command.\n".to_owned(),
                content: body.into_bytes(),
                channel: posted.channel,
                thread_ts: posted.ts,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use plugin_test::{MockChat, MockTranslator, test_context};

    use super::*;

    fn translate_command(text: &str) -> ParsedCommand {
        ParsedCommand {
            channel: "C1".to_owned(),
            command: "translate".to_owned(),
            argument: text.to_owned(),
            ..ParsedCommand::default()
        }
    }

    #[test]
    fn primary_language_goes_to_secondary() {
        let cfg = TranslateConfig::default();
        assert_eq!(cfg.target_for("ja"), "en");
        assert_eq!(cfg.target_for("en"), "ja");
        assert_eq!(cfg.target_for("fr"), "ja");
    }

    #[tokio::test]
    async fn uploads_result_into_thread() {
        let chat = Arc::new(MockChat::new());
        let ctx = PluginContext {
            translator: Arc::new(MockTranslator::detecting("en")),
            ..test_context(Arc::clone(&chat))
        };

        Translate
            .run(
                &ctx,
                &translate_command("hello there"),
                &PluginSpec::new("translate", &["translate"]),
            )
            .await
            .unwrap();

        let uploads = chat.uploads();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert_eq!(upload.thread_ts, "1600128000.000001");
        assert!(upload.filename.ends_with("_translate_command_result.text"));
        let body = String::from_utf8(upload.content.clone()).unwrap();
        assert!(body.contains("[ja] hello there"));
    }

    #[tokio::test]
    async fn configured_languages_apply() {
        let chat = Arc::new(MockChat::new());
        let ctx = PluginContext {
            translator: Arc::new(MockTranslator::detecting("de")),
            ..test_context(Arc::clone(&chat))
        };
        let mut spec = PluginSpec::new("translate", &["translate"]);
        spec.config = serde_yaml::from_str("primary: de\nsecondary: fr").unwrap();

        Translate
            .run(&ctx, &translate_command("guten tag"), &spec)
            .await
            .unwrap();

        let body = String::from_utf8(chat.uploads()[0].content.clone()).unwrap();
        assert!(body.contains("[fr] guten tag"));
    }

    #[tokio::test]
    async fn detection_failure_propagates() {
        let chat = Arc::new(MockChat::new());
        let ctx = PluginContext {
            translator: Arc::new(MockTranslator::failing()),
            ..test_context(Arc::clone(&chat))
        };

        let result = Translate
            .run(
                &ctx,
                &translate_command("hi"),
                &PluginSpec::new("translate", &["translate"]),
            )
            .await;

        assert!(result.is_err());
        assert!(chat.posted().is_empty());
    }
}

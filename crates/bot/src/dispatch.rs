use anyhow::{Context as _, Result, anyhow};
use tracing::{info, warn};

use plugin_core::{ParsedCommand, PluginContext, PluginEntry, reply};
use plugin_help::HELP_ID;

/// Routes parsed commands to plugins and reports their failures in chat.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: PluginContext,
}

impl Dispatcher {
    pub const fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    /// The enabled plugin answering `command`, else the help plugin.
    async fn resolve(&self, command: &str) -> Result<PluginEntry> {
        let registry = &self.ctx.registry;
        if let Some(entry) = registry.entry_by_command(command).await {
            if entry.spec.enabled {
                return Ok(entry);
            }
            info!(command, plugin = %entry.spec.id, "Plugin disabled; sending help");
        } else {
            info!(command, "Unrecognized command; sending help");
        }
        registry
            .entry(HELP_ID)
            .await
            .ok_or_else(|| anyhow!("help plugin is not registered"))
    }

    /// Runs the command. A plugin error is turned into one failure message;
    /// only a failure to send that message is returned.
    pub async fn dispatch(&self, cmd: &ParsedCommand) -> Result<()> {
        let entry = self.resolve(&cmd.command).await?;
        let plugin_id = entry.spec.id.as_str();
        info!(command = %cmd.command, plugin = %plugin_id, channel = %cmd.channel, "Dispatching");

        let Err(e) = entry.plugin.run(&self.ctx, cmd, &entry.spec).await else {
            return Ok(());
        };
        warn!(error = %format!("{e:#}"), plugin = %plugin_id, "Plugin failed");

        let notice = reply::failure(
            cmd,
            &format!("Command execution failed. *[{e:#}]*"),
            self.ctx.display_offset,
        );
        self.ctx
            .chat
            .post_message(&cmd.channel, &notice)
            .await
            .context("posting failure notification")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::bail;
    use async_trait::async_trait;
    use plugin_core::{Plugin, PluginSpec};
    use plugin_help::Help;
    use plugin_test::{MockChat, test_context};

    use super::*;

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        fn id(&self) -> &'static str {
            "boom"
        }
        fn help(&self) -> &'static str {
            "BOOM-HELP"
        }
        async fn run(&self, _: &PluginContext, _: &ParsedCommand, _: &PluginSpec) -> Result<()> {
            bail!("kaput")
        }
    }

    async fn dispatcher(chat: Arc<MockChat>) -> Dispatcher {
        let ctx = test_context(chat);
        ctx.registry
            .register(PluginSpec::new(HELP_ID, &["help"]), Arc::new(Help))
            .await;
        ctx.registry
            .register(PluginSpec::new("boom", &["boom"]), Arc::new(Failing))
            .await;
        Dispatcher::new(ctx)
    }

    fn command(name: &str) -> ParsedCommand {
        ParsedCommand {
            channel: "C1".to_owned(),
            from: "U061F7AUR00".to_owned(),
            command: name.to_owned(),
            text: format!("<@U0LAN0Z8900> {name}"),
            ..ParsedCommand::default()
        }
    }

    #[tokio::test]
    async fn unknown_and_empty_commands_get_help() {
        let chat = Arc::new(MockChat::new());
        let dispatcher = dispatcher(Arc::clone(&chat)).await;

        dispatcher.dispatch(&command("nope")).await.unwrap();
        dispatcher.dispatch(&command("")).await.unwrap();
        dispatcher.dispatch(&command("Boom")).await.unwrap();

        let posted = chat.posted();
        assert_eq!(posted.len(), 3);
        assert!(posted.iter().all(|(_, r)| r.sections[0].contains("command help")));
    }

    #[tokio::test]
    async fn disabled_command_gets_help() {
        let chat = Arc::new(MockChat::new());
        let dispatcher = dispatcher(Arc::clone(&chat)).await;
        let mut spec = PluginSpec::new("boom", &["boom"]);
        spec.enabled = false;
        dispatcher.ctx.registry.register(spec, Arc::new(Failing)).await;

        dispatcher.dispatch(&command("boom")).await.unwrap();

        let posted = chat.posted();
        assert_eq!(posted.len(), 1);
        assert!(!posted[0].1.fallback_text().contains("kaput"));
    }

    #[tokio::test]
    async fn failure_is_reported_once() {
        let chat = Arc::new(MockChat::new());
        let dispatcher = dispatcher(Arc::clone(&chat)).await;

        dispatcher.dispatch(&command("boom")).await.unwrap();

        let posted = chat.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "C1");
        assert!(
            posted[0]
                .1
                .fallback_text()
                .contains("Command execution failed. *[kaput]*")
        );
    }

    #[tokio::test]
    async fn failed_notification_is_returned() {
        let chat = Arc::new(MockChat::new().failing_posts());
        let dispatcher = dispatcher(Arc::clone(&chat)).await;

        let err = dispatcher.dispatch(&command("boom")).await.unwrap_err();
        assert!(format!("{err:#}").contains("channel_not_found"));
    }

    #[tokio::test]
    async fn missing_help_plugin_is_an_error() {
        let dispatcher = Dispatcher::new(test_context(Arc::new(MockChat::new())));
        assert!(dispatcher.dispatch(&command("anything")).await.is_err());
    }
}

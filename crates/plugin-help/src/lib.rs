use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use plugin_core::{
    ParsedCommand, Plugin, PluginContext, PluginSpec,
    factory::PluginFactory,
    reply::{Outcome, Reply},
};

pub const HELP_ID: &str = "help";

#[derive(Debug)]
pub struct HelpPlugin;

impl PluginFactory for HelpPlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        if !specs.iter().any(|s| s.id == HELP_ID) {
            specs.push(PluginSpec::new(HELP_ID, &["help"]));
        }
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(Help)
    }
}

/// Lists every enabled command. Also answers unknown commands.
#[derive(Debug)]
pub struct Help;

#[async_trait]
impl Plugin for Help {
    fn id(&self) -> &'static str {
        HELP_ID
    }

    fn help(&self) -> &'static str {
        "List available commands."
    }

    async fn run(&self, ctx: &PluginContext, cmd: &ParsedCommand, _spec: &PluginSpec) -> Result<()> {
        let mut sections = Vec::new();
        for (id, entry) in ctx.registry.entries().await {
            if id == HELP_ID || !entry.spec.enabled {
                continue;
            }
            sections.push(entry.plugin.help());
        }
        let text = format!(
            "*Commands:*\n{}\n\n> :information_source: _See the documentation if you need more details._",
            sections.join("\n\n")
        );
        let reply = Reply::new(&cmd.from, Outcome::Help).with_section(text);
        ctx.chat.post_message(&cmd.channel, &reply).await?;
        info!(requested = %cmd.command, "Sent help");
        Ok(())
    }
}

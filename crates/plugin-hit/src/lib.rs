pub mod select;

use std::{
    fmt::Write as _,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::rngs::StdRng;
use tracing::{debug, info};

use plugin_core::{
    ParsedCommand, Plugin, PluginContext, PluginSpec,
    factory::PluginFactory,
    reply::{Outcome, Reply},
};

use crate::select::{eligible, requested_count, select};

/// Random source shared by every `hit` invocation in the process.
pub type SharedRng = Arc<Mutex<StdRng>>;

const EXCLUDE_FLAG: &str = "--ex";

#[derive(Debug)]
pub struct HitPlugin {
    rng: SharedRng,
}

impl HitPlugin {
    #[must_use]
    pub const fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl PluginFactory for HitPlugin {
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>) {
        if !specs.iter().any(|s| s.id == "hit") {
            specs.push(PluginSpec::new("hit", &["hit"]));
        }
    }

    fn build(&self) -> Arc<dyn Plugin> {
        Arc::new(Hit {
            rng: Arc::clone(&self.rng),
        })
    }
}

#[derive(Debug)]
pub struct Hit {
    rng: SharedRng,
}

#[async_trait]
impl Plugin for Hit {
    fn id(&self) -> &'static str {
        "hit"
    }

    fn help(&self) -> &'static str {
        ":book: *hit*\n```DESCRIPTION: \n • Randomly select from the members in the channel\nSYNOPSIS: \n • @hitter hit <Number> [<Options> ...]\nOPTIONS: \n • --ex <User>\nEXAMPLES: \n • @hitter hit 2\n • @hitter hit 3 --ex @userA --ex @userB\n```"
    }

    async fn run(&self, ctx: &PluginContext, cmd: &ParsedCommand, _spec: &PluginSpec) -> Result<()> {
        let members = ctx.chat.list_channel_members(&cmd.channel).await?;
        let (humans, bots) = ctx.chat.classify_users(&members).await?;
        debug!(humans = ?humans, bots = ?bots, "Classified channel members");

        let exclusions = cmd.option_values(EXCLUDE_FLAG);
        let pool = eligible(humans, exclusions);
        let count = requested_count(&cmd.argument);
        debug!(exclusions = ?exclusions, pool = ?pool, count, "Drawing");

        let chosen = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| anyhow!("random source poisoned"))?;
            select(&pool, count, &mut *rng)?
        };
        info!(chosen = chosen.len(), pool = pool.len(), "hit selection done");

        let reply = Reply::new(&cmd.from, Outcome::Success)
            .with_command(&cmd.text, &cmd.event_ts, ctx.display_offset)
            .with_results(&render_results(&chosen));
        ctx.chat.post_message(&cmd.channel, &reply).await?;
        Ok(())
    }
}

fn render_results(chosen: &[String]) -> String {
    let mut text = String::new();
    for (i, id) in chosen.iter().enumerate() {
        let n = i + 1;
        let _ = writeln!(text, ":tada: *[{n}]:*  <@{id}> You are choice number *{n}*.\n");
    }
    text.push_str("\n> :zap: _If you have a problem with your choice, please try again._");
    text
}

pub mod command;
pub mod dates;
pub mod factory;
pub mod reply;
pub mod services;

use std::{borrow::ToOwned, collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::UtcOffset;
use tokio::sync::RwLock;

pub use crate::command::ParsedCommand;
use crate::services::{ChatPlatform, ObjectStore, RecordTable, Translator};

/// Everything a command handler may reach while running.
#[derive(Clone)]
pub struct PluginContext {
    pub chat: Arc<dyn ChatPlatform>,
    pub translator: Arc<dyn Translator>,
    pub objects: Arc<dyn ObjectStore>,
    pub urls: Arc<dyn RecordTable>,
    pub registry: Arc<PluginRegistry>,
    /// Base URL the shortener hands out links under.
    pub public_base_url: Arc<str>,
    /// Offset used when dates are shown to people.
    pub display_offset: UtcOffset,
}

impl core::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginContext")
            .field("public_base_url", &self.public_base_url)
            .field("display_offset", &self.display_offset)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn help(&self) -> &'static str;
    async fn run(&self, ctx: &PluginContext, cmd: &ParsedCommand, spec: &PluginSpec)
    -> Result<()>;
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PluginTriggers {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginSpec {
    pub id: String,
    #[serde(default = "enabled_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: PluginTriggers,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

const fn enabled_true() -> bool {
    true
}

impl PluginSpec {
    #[must_use]
    pub fn new(id: &str, commands: &[&str]) -> Self {
        Self {
            id: id.to_owned(),
            enabled: true,
            triggers: PluginTriggers {
                commands: commands.iter().map(|c| (*c).to_owned()).collect(),
            },
            config: serde_yaml::Value::default(),
        }
    }
}

#[derive(Clone)]
pub struct PluginEntry {
    pub spec: PluginSpec,
    pub plugin: Arc<dyn Plugin>,
}

impl core::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("spec", &self.spec)
            .field("plugin", &self.plugin.id())
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, PluginEntry>,
    by_command: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl core::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginRegistry").finish_non_exhaustive()
    }
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, spec: PluginSpec, plugin: Arc<dyn Plugin>) -> Option<PluginEntry> {
        let mut inner = self.inner.write().await;
        let id = spec.id.clone();
        let previous = inner.by_id.insert(
            id.clone(),
            PluginEntry {
                spec: spec.clone(),
                plugin,
            },
        );
        inner.remove_triggers_for(&id);
        for cmd in &spec.triggers.commands {
            let cmd = cmd.trim();
            if !cmd.is_empty() {
                inner.by_command.insert(cmd.to_owned(), id.clone());
            }
        }
        previous
    }

    pub async fn entry(&self, id: &str) -> Option<PluginEntry> {
        let inner = self.inner.read().await;
        inner.by_id.get(id).cloned()
    }

    /// Command names are matched case-sensitively.
    pub async fn entry_by_command(&self, command: &str) -> Option<PluginEntry> {
        let inner = self.inner.read().await;
        inner
            .by_command
            .get(command)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Entries sorted by plugin id.
    pub async fn entries(&self) -> Vec<(String, PluginEntry)> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .by_id
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl RegistryInner {
    fn remove_triggers_for(&mut self, id: &str) {
        self.by_command.retain(|_, existing| existing != id);
    }
}

pub fn str_config(spec: &PluginSpec, key: &str) -> Option<String> {
    spec.config
        .get(key)
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}

#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        fn id(&self) -> &'static str {
            "noop"
        }
        fn help(&self) -> &'static str {
            ""
        }
        async fn run(&self, _: &PluginContext, _: &ParsedCommand, _: &PluginSpec) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_replaces_old_triggers() {
        let registry = PluginRegistry::new();
        registry
            .register(PluginSpec::new("noop", &["a", "b"]), Arc::new(Noop))
            .await;
        registry
            .register(PluginSpec::new("noop", &["c"]), Arc::new(Noop))
            .await;

        assert!(registry.entry_by_command("a").await.is_none());
        assert!(registry.entry_by_command("c").await.is_some());
    }

    #[tokio::test]
    async fn command_lookup_is_case_sensitive() {
        let registry = PluginRegistry::new();
        registry
            .register(PluginSpec::new("noop", &["hit"]), Arc::new(Noop))
            .await;

        assert!(registry.entry_by_command("hit").await.is_some());
        assert!(registry.entry_by_command("Hit").await.is_none());
    }

    #[tokio::test]
    async fn disabled_spec_stays_routable() {
        let registry = PluginRegistry::new();
        let mut spec = PluginSpec::new("noop", &["x"]);
        spec.enabled = false;
        registry.register(spec, Arc::new(Noop)).await;

        assert!(!registry.entry_by_command("x").await.unwrap().spec.enabled);
        assert!(registry.entry("missing").await.is_none());
    }

    #[test]
    fn str_config_reads_string_values() {
        let mut spec = PluginSpec::new("noop", &[]);
        spec.config = serde_yaml::from_str("base_url: https://s.example\nttl: 3").unwrap();

        assert_eq!(
            str_config(&spec, "base_url").as_deref(),
            Some("https://s.example")
        );
        assert_eq!(str_config(&spec, "ttl"), None);
    }
}

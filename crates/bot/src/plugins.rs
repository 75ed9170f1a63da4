use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use plugin_core::{PluginRegistry, PluginSpec, factory::PluginFactory};
use plugin_help::HelpPlugin;
use plugin_hit::{HitPlugin, SharedRng};
use plugin_link::LinkPlugin;
use plugin_short::ShortPlugin;
use plugin_translate::TranslatePlugin;
use tracing::{info, warn};

use crate::config::BotConfig;

type Factory = Box<dyn PluginFactory + Send + Sync>;

/// Registers the built-in commands, applying `config.yaml` specs and
/// `<plugins_dir>/<id>/config.yaml` overrides.
pub async fn build_registry(
    config: &BotConfig,
    plugins_dir: &Path,
    rng: SharedRng,
) -> Arc<PluginRegistry> {
    #[rustfmt::skip]
    let factories: Vec<(&'static str, Factory)> = vec![
        (plugin_help::HELP_ID, Box::new(HelpPlugin) as Factory),
        ("hit", Box::new(HitPlugin::new(rng)) as Factory),
        ("translate", Box::new(TranslatePlugin) as Factory),
        ("link", Box::new(LinkPlugin) as Factory),
        ("short", Box::new(ShortPlugin) as Factory),
    ];

    let mut specs = config.plugins.clone().unwrap_or_default();
    for (_, factory) in &factories {
        let mut defaults = Vec::new();
        factory.register_defaults(&mut defaults);
        for default in defaults {
            merge_default_spec(&mut specs, default);
        }
    }

    let plugins: HashMap<_, _> = factories.into_iter().collect();
    let registry = Arc::new(PluginRegistry::new());

    for mut spec in specs {
        let Some(factory) = plugins.get(spec.id.as_str()) else {
            warn!("Unknown plugin ID: {}", spec.id);
            continue;
        };
        if let Some(file_cfg) = load_plugin_config(plugins_dir, &spec.id) {
            spec.config = merge_yaml(file_cfg, spec.config);
        }
        info!(
            plugin = %spec.id,
            enabled = spec.enabled,
            commands = ?spec.triggers.commands,
            "Registered plugin"
        );
        registry.register(spec, factory.build()).await;
    }

    registry
}

/// Deep merge where `file_cfg` wins on scalar conflicts and sequences are
/// concatenated.
fn merge_yaml(file_cfg: serde_yaml::Value, spec_cfg: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value::{Mapping, Null, Sequence};
    match (file_cfg, spec_cfg) {
        (Mapping(mut a), Mapping(b)) => {
            for (k, v_b) in b {
                match a.get_mut(&k) {
                    Some(v_a) => {
                        let merged = merge_yaml(v_a.clone(), v_b);
                        *v_a = merged;
                    }
                    None => {
                        a.insert(k, v_b);
                    }
                }
            }
            Mapping(a)
        }
        (Sequence(mut a), Sequence(b)) => {
            a.extend(b);
            Sequence(a)
        }
        (Null, b) => b,
        (a, _b) => a,
    }
}

fn load_plugin_config(root: &Path, id: &str) -> Option<serde_yaml::Value> {
    let path: PathBuf = root.join(id).join("config.yaml");
    match std::fs::read_to_string(&path) {
        Ok(s) => match serde_yaml::from_str::<serde_yaml::Value>(&s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(plugin = %id, file = %path.display(), error = %e, "Failed to parse plugin config YAML");
                None
            }
        },
        Err(e) => {
            if path.exists() {
                warn!(plugin = %id, file = %path.display(), error = %e, "Failed to read plugin config file");
            }
            None
        }
    }
}

/// Adds the default command names to a user-provided spec, or the whole
/// default spec when the user did not mention the plugin.
fn merge_default_spec(specs: &mut Vec<PluginSpec>, default: PluginSpec) {
    if let Some(existing) = specs.iter_mut().find(|s| s.id == default.id) {
        for cmd in default.triggers.commands {
            if !existing.triggers.commands.iter().any(|c| *c == cmd) {
                existing.triggers.commands.push(cmd);
            }
        }
        // enabled and config stay as the user wrote them
    } else {
        specs.push(default);
    }
}

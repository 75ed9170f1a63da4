use std::sync::Arc;

use crate::{Plugin, PluginSpec};

/// Builds a command plugin and describes how it is wired by default.
pub trait PluginFactory {
    /// Adds the plugin's default spec (id and command names) unless a spec
    /// with the same id is already present.
    fn register_defaults(&self, specs: &mut Vec<PluginSpec>);

    /// Builds the plugin instance.
    #[must_use]
    fn build(&self) -> Arc<dyn Plugin>;
}

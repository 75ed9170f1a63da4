use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use serde::Deserialize;
use time::UtcOffset;

use plugin_core::PluginSpec;

/// Process settings, read once at startup from flags or the environment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hitter-bot",
    version,
    about = "Slack mention bot: hit, translate, link and short commands"
)]
pub struct Settings {
    /// Bot token used for Web API calls
    #[arg(long, env = "SLACK_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub slack_token: String,

    /// Token every inbound event must carry
    #[arg(long, env = "SLACK_VERIFICATION_TOKEN", hide_env_values = true)]
    pub verification_token: String,

    /// Only accept events from this channel
    #[arg(long, env = "SLACK_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Slack Web API base URL
    #[arg(long, env = "SLACK_API_BASE", default_value = "https://slack.com/api")]
    pub slack_api_base: String,

    /// JSON file holding processed event ids (in memory when unset)
    #[arg(long, env = "MUTEX_TABLE_PATH")]
    pub mutex_table: Option<PathBuf>,

    /// JSON file holding short URLs (in memory when unset)
    #[arg(long, env = "URL_TABLE_PATH")]
    pub url_table: Option<PathBuf>,

    /// Directory where linked attachments are stored
    #[arg(long, env = "OBJECT_STORE_DIR", default_value = "./objects")]
    pub object_dir: PathBuf,

    /// Days a linked attachment is kept
    #[arg(long, env = "OBJECT_RETENTION_DAYS", default_value_t = 1)]
    pub object_retention_days: i64,

    /// Secret that signs object links (random per process when unset)
    #[arg(long, env = "OBJECT_SIGNING_SECRET", hide_env_values = true)]
    pub object_signing_secret: Option<String>,

    /// Public base URL of this service, used for short and object links
    #[arg(long, env = "API_BASE_URL")]
    pub api_base_url: String,

    /// LibreTranslate-compatible endpoint for the translate command
    #[arg(long, env = "TRANSLATE_API_URL")]
    pub translate_api_url: Option<String>,

    /// API key sent to the translation endpoint
    #[arg(long, env = "TRANSLATE_API_KEY", hide_env_values = true)]
    pub translate_api_key: Option<String>,

    /// Address the webhook server listens on
    #[arg(long, env = "HITTER_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Optional YAML file with plugin settings
    #[arg(long, env = "HITTER_CONFIG", default_value = "./config.yaml")]
    pub config: PathBuf,

    /// Directory searched for `<plugin>/config.yaml` overrides
    #[arg(long, env = "PLUGINS_DIR", default_value = "./plugins")]
    pub plugins_dir: PathBuf,

    /// Timeout for outbound HTTP calls in milliseconds
    #[arg(long, env = "HTTP_TIMEOUT_MS", default_value_t = 10_000)]
    pub http_timeout_ms: u64,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, env = "DEBUG_LOG", default_value_t = false)]
    pub debug_log: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BotConfig {
    #[serde(default)]
    pub plugins: Option<Vec<PluginSpec>>,
    /// Hours east of UTC used when dates are shown in chat.
    #[serde(default)]
    pub display_offset_hours: Option<i8>,
}

impl BotConfig {
    pub fn display_offset(&self) -> Result<UtcOffset> {
        let hours = self.display_offset_hours.unwrap_or(9);
        UtcOffset::from_hms(hours, 0, 0).map_err(|e| anyhow!("invalid display_offset_hours: {e}"))
    }
}

/// Reads the YAML config. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        return Ok(BotConfig::default());
    }
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {}", path.display()))?;
    let cfg: BotConfig = serde_yaml::from_str(&yaml).context("parsing YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn settings_parse_from_flags() {
        let settings = Settings::try_parse_from([
            "hitter-bot",
            "--slack-token",
            "xoxb-1",
            "--verification-token",
            "vt",
            "--api-base-url",
            "https://s.example/",
        ])
        .unwrap();

        assert_eq!(settings.listen, "0.0.0.0:3000");
        assert_eq!(settings.channel_id, None);
        assert!(!settings.debug_log);
    }

    #[test]
    fn missing_config_file_gives_defaults() {
        let cfg = load_config(Path::new("/definitely/not/here.yaml")).unwrap();
        assert!(cfg.plugins.is_none());
        assert_eq!(cfg.display_offset().unwrap(), UtcOffset::from_hms(9, 0, 0).unwrap());
    }

    #[test]
    fn config_file_lists_plugins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "display_offset_hours: 0\nplugins:\n  - id: short\n    enabled: false\n  - id: hit\n    triggers:\n      commands: [hit, pick]"
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        let plugins = cfg.plugins.unwrap();

        assert!(!plugins[0].enabled);
        assert_eq!(plugins[1].triggers.commands, ["hit", "pick"]);
        assert_eq!(cfg.display_offset_hours, Some(0));
    }
}

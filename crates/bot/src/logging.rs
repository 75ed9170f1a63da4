use anyhow::{Context as _, Result};
use tracing::{Subscriber, level_filters::LevelFilter};
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _,
};

/// Output style of the fmt layer, picked by `RUST_LOG_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    Pretty,
}

impl LogFormat {
    fn from_mode(mode: Option<&str>) -> Self {
        match mode.map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }

    pub fn layer<S>(self) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        for<'a> S: Subscriber + LookupSpan<'a>,
    {
        let fmt = tracing_subscriber::fmt::layer();
        match self {
            Self::Json => Box::new(
                fmt.json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(false),
            ),
            Self::Pretty => Box::new(
                fmt.pretty()
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `debug`.
pub fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env()
        .context("parsing RUST_LOG")?;
    let format = LogFormat::from_mode(std::env::var("RUST_LOG_MODE").ok().as_deref());

    tracing_subscriber::registry()
        .with(filter)
        .with(format.layer())
        .try_init()
        .context("installing tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selects_format() {
        assert_eq!(LogFormat::from_mode(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_mode(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::from_mode(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::from_mode(None), LogFormat::Pretty);
    }
}

use std::env;

use tracing_subscriber::EnvFilter;
#[cfg(target_os = "linux")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(target_os = "linux")]
use tracing_subscriber::util::SubscriberInitExt;

/// How a process wants its logs set up.
///
/// `filter_env` names the service-specific filter variable (checked before
/// `RUST_LOG`), `format_env` selects `text` or `json` output.
#[derive(Debug, Clone, Copy)]
pub struct LogSettings<'a> {
    pub default_filter: &'a str,
    pub filter_env: &'a str,
    pub format_env: &'a str,
    pub service_name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" | "pretty" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn init_logging(settings: &LogSettings<'_>) {
    let env_filter = build_env_filter(settings.default_filter, settings.filter_env);
    let format = resolve_format(settings);

    #[cfg(target_os = "linux")]
    {
        if format == LogFormat::Text && is_running_under_systemd() {
            match tracing_journald::layer() {
                Ok(layer) => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer)
                        .init();
                    return;
                }
                Err(err) => {
                    eprintln!(
                        "{}: journald init failed, falling back to stderr formatter: {err}",
                        settings.service_name
                    );
                }
            }
        }
    }

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(false)
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init()
        }
    }
}

fn resolve_format(settings: &LogSettings<'_>) -> LogFormat {
    let Ok(raw) = env::var(settings.format_env) else {
        return LogFormat::default();
    };

    LogFormat::parse(&raw).unwrap_or_else(|| {
        eprintln!(
            "{}: unknown {}={raw:?}, using text logs",
            settings.service_name, settings.format_env
        );
        LogFormat::default()
    })
}

fn build_env_filter(
    default_filter: &str,
    env_key: &str,
) -> EnvFilter {
    EnvFilter::try_from_env(env_key)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter))
}

#[cfg(target_os = "linux")]
#[inline]
fn is_running_under_systemd() -> bool {
    env::var_os("JOURNAL_STREAM").is_some()
        || env::var_os("INVOCATION_ID").is_some()
}

#[cfg(test)]
mod tests {
    use super::LogFormat;

    #[test]
    fn parses_known_formats() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" text "), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("logfmt"), None);
    }
}

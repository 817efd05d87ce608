//! Log configuration for the `stacklink` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary through [`init_logging`].

use std::{env, fmt, str::FromStr};

use tracing_subscriber::{filter::LevelFilter, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "STACKLINK_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "STACKLINK_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown log format {:?}", s))
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown log level {:?}", s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Text,
        level: LogLevel::Warn,
    };

    /// Environment first, then explicit flags on top.
    pub fn resolve(format: Option<LogFormat>, level: Option<LogLevel>) -> Self {
        let env_format = env::var(LOG_FORMAT_ENV).ok();
        let env_level = env::var(LOG_LEVEL_ENV).ok();
        let base = apply_env_overrides(Self::DEFAULT, env_format.as_deref(), env_level.as_deref());
        Self {
            format: format.unwrap_or(base.format),
            level: level.unwrap_or(base.level),
        }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn apply_env_overrides(
    mut options: LogOptions,
    format: Option<&str>,
    level: Option<&str>,
) -> LogOptions {
    if let Some(spec) = format.and_then(LogFormat::parse) {
        options.format = spec;
    }
    if let Some(spec) = level.and_then(LogLevel::parse) {
        options.level = spec;
    }
    options
}

/// `RUST_LOG` directives when present, otherwise everything at `options.level`.
fn env_filter(options: &LogOptions, directives: Option<&str>) -> EnvFilter {
    let default = LevelFilter::from_level(options.level.as_tracing_level());
    EnvFilter::builder()
        .with_default_directive(default.into())
        .parse_lossy(directives.unwrap_or_default())
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(options: &LogOptions) {
    use std::sync::OnceLock;
    use tracing_subscriber::fmt;

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let directives = env::var(EnvFilter::DEFAULT_ENV).ok();
        let builder = fmt::fmt()
            .with_env_filter(env_filter(options, directives.as_deref()))
            .with_writer(std::io::stderr)
            .with_target(true);

        match options.format {
            LogFormat::Json => {
                let _ = tracing::subscriber::set_global_default(builder.json().finish());
            }
            LogFormat::Text => {
                let _ = tracing::subscriber::set_global_default(builder.compact().finish());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_and_formats_parse_case_insensitively() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("plain"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("xml"), None);

        assert_eq!(LogLevel::parse("Debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn env_overrides_defaults_and_ignores_garbage() {
        let opts = apply_env_overrides(LogOptions::DEFAULT, Some("json"), Some("nope"));
        assert_eq!(opts.format, LogFormat::Json);
        assert_eq!(opts.level, LogOptions::DEFAULT.level);
    }

    #[test]
    fn rust_log_directives_replace_the_level() {
        let opts = LogOptions {
            level: LogLevel::Warn,
            ..LogOptions::DEFAULT
        };
        assert_eq!(env_filter(&opts, None).to_string(), "warn");
        let filter = env_filter(&opts, Some("pipeline=trace")).to_string();
        assert!(filter.contains("pipeline=trace"), "{}", filter);
    }
}

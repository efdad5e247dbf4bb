//! Log configuration for the `canon` binary.
//!
//! Options come from `CANON_LOG_FORMAT` / `CANON_LOG_LEVEL`, overridden by
//! the `--log-format` / `--log-level` flags. `RUST_LOG` still wins when set.

use std::env;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Auto,
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Auto => "auto",
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
        match spec.trim().to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
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

/// Effective log configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Auto,
        level: LogLevel::Warn,
    };

    #[must_use]
    pub fn with_overrides(base: Self, overrides: LogSettings) -> Self {
        Self {
            format: overrides.format.unwrap_or(base.format),
            level: overrides.level.unwrap_or(base.level),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        let format = env::var("CANON_LOG_FORMAT").ok();
        let level = env::var("CANON_LOG_LEVEL").ok();
        apply_env_overrides(Self::DEFAULT, format.as_deref(), level.as_deref())
    }

    /// `Auto` becomes `Text`.
    #[must_use]
    pub fn resolved(self) -> Self {
        let format = match self.format {
            LogFormat::Auto => LogFormat::Text,
            other => other,
        };
        Self { format, ..self }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Overrides parsed from the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSettings {
    pub format: Option<LogFormat>,
    pub level: Option<LogLevel>,
}

impl LogSettings {
    #[must_use]
    pub fn merged_with_env(self) -> LogOptions {
        LogOptions::with_overrides(LogOptions::from_env(), self)
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

/// Install the global subscriber once. Events go to stderr so command
/// output on stdout stays machine-readable.
pub fn init_logging(options: LogOptions) {
    use std::sync::OnceLock;
    use tracing_subscriber::{fmt, EnvFilter};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let options = options.resolved();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_ansi(false);

        match options.format {
            LogFormat::Json => {
                let _ = tracing::subscriber::set_global_default(builder.json().finish());
            }
            _ => {
                let _ = tracing::subscriber::set_global_default(builder.compact().finish());
            }
        }
        tracing::debug!(
            target: "canon::cli",
            format = %options.format,
            level = %options.level,
            max = ?options.level.as_tracing_level(),
            "logging initialised"
        );
    });
}

//! Engine configuration loaded from TOML

use crate::data::PathMatchOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Log level enumeration for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(anyhow::anyhow!(
                "Invalid log level: {}. Valid options: error, warn, info, debug, trace",
                s
            )),
        }
    }
}

impl LogLevel {
    /// Convert to tracing level filter
    pub fn to_tracing_level_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub lines: LinesConfig,
    #[serde(default)]
    pub variables: VariablesConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
}

/// Settings the embedding host applies; the engine only parses them
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Level for the host's `tracing` subscriber, see
    /// [`LogLevel::to_tracing_level_filter`]. The engine never installs a
    /// subscriber itself.
    #[serde(default)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Request 16-bit packing of min-precision types. Unset follows the
    /// module's capability flag; `true` without the capability falls back to
    /// the unpacked layout with a diagnostic.
    #[serde(default)]
    pub pack_min_precision: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LinesConfig {
    #[serde(default = "default_true")]
    pub match_suffix: bool,
    #[serde(default = "default_true")]
    pub match_basename: bool,
    #[serde(default)]
    pub case_insensitive_paths: bool,
}

impl Default for LinesConfig {
    fn default() -> Self {
        Self {
            match_suffix: true,
            match_basename: true,
            case_insensitive_paths: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VariablesConfig {
    /// Drop outer variables whose name is redeclared in an inner scope
    #[serde(default = "default_true")]
    pub hide_shadowed: bool,
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            hide_shadowed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoadingConfig {
    #[serde(default = "default_true")]
    pub parallel_modules: bool,
    /// 0 means one per CPU
    #[serde(default)]
    pub max_concurrency: usize,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            parallel_modules: true,
            max_concurrency: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

const MAX_CONCURRENCY_LIMIT: usize = 1024;

impl EngineConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file '{}'", path.display()))?;
        let config = Self::from_toml_str(&content, &path.display().to_string())?;
        info!("Loaded engine configuration from: {}", path.display());
        Ok(config)
    }

    /// Parse configuration text; `origin` names the source in error messages
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Self::create_friendly_toml_error(origin, content, e))?;
        config.validate().with_context(|| format!("Invalid configuration in '{origin}'"))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.loading.max_concurrency > MAX_CONCURRENCY_LIMIT {
            return Err(anyhow::anyhow!(
                "loading.max_concurrency = {} exceeds the limit of {}",
                self.loading.max_concurrency,
                MAX_CONCURRENCY_LIMIT
            ));
        }
        Ok(())
    }

    /// File matching options for source lookups
    pub fn path_match_options(&self) -> PathMatchOptions {
        PathMatchOptions {
            match_suffix: self.lines.match_suffix,
            match_basename: self.lines.match_basename,
            case_insensitive: self.lines.case_insensitive_paths,
        }
    }

    /// Create a user-friendly error message for TOML parsing errors
    fn create_friendly_toml_error(
        origin: &str,
        content: &str,
        error: toml::de::Error,
    ) -> anyhow::Error {
        let error_msg = format!("Configuration parsing error in '{origin}'");

        match error.span() {
            Some(span) => {
                let before = &content[..span.start.min(content.len())];
                let line_num = before.matches('\n').count() + 1;
                let line_start = before.rfind('\n').map(|p| p + 1).unwrap_or(0);
                let col_num = span.start.saturating_sub(line_start) + 1;
                let context_line = content.lines().nth(line_num - 1).unwrap_or("");

                anyhow::anyhow!(
                    "{}\n\nError at line {}, column {}:\n{}\n\n{}\n{}^\n\nSuggestion: {}",
                    error_msg,
                    line_num,
                    col_num,
                    error,
                    context_line,
                    " ".repeat(col_num.saturating_sub(1)),
                    Self::get_error_suggestion(&error.to_string())
                )
            }
            None => anyhow::anyhow!(
                "{}\n\n{}\n\nSuggestion: {}",
                error_msg,
                error,
                Self::get_error_suggestion(&error.to_string())
            ),
        }
    }

    /// Provide helpful suggestions based on common configuration errors
    fn get_error_suggestion(error_msg: &str) -> &'static str {
        if error_msg.contains("log_level") {
            "Valid log levels are: 'error', 'warn', 'info', 'debug', 'trace'"
        } else if error_msg.contains("unknown field") {
            "Check the field name spelling and ensure it's in the correct section \
             ([general], [layout], [lines], [variables], [loading])"
        } else if error_msg.contains("invalid type") {
            "Check the value type - booleans are true/false, numbers should not be quoted"
        } else {
            "Please check the configuration file syntax"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml_str("", "<test>").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.variables.hide_shadowed);
        assert!(config.lines.match_suffix);
        assert_eq!(config.layout.pack_min_precision, None);
        assert_eq!(config.general.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_sections_parse() {
        let config = EngineConfig::from_toml_str(
            r#"
[general]
log_level = "debug"

[layout]
pack_min_precision = true

[lines]
case_insensitive_paths = true
match_basename = false

[variables]
hide_shadowed = false
"#,
            "<test>",
        )
        .unwrap();
        assert_eq!(config.general.log_level, LogLevel::Debug);
        assert_eq!(config.layout.pack_min_precision, Some(true));
        let opts = config.path_match_options();
        assert!(opts.case_insensitive && opts.match_suffix && !opts.match_basename);
        assert!(!config.variables.hide_shadowed);
    }

    #[test]
    fn test_friendly_errors() {
        let err = EngineConfig::from_toml_str("[lines]\nmatch_sufix = true\n", "cfg.toml")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cfg.toml"));
        assert!(msg.contains("line 2"));

        let err = EngineConfig::from_toml_str("[loading]\nmax_concurrency = 4096\n", "cfg.toml")
            .unwrap_err();
        assert!(format!("{err:#}").contains("max_concurrency"));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("TRACE".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(
            LogLevel::Info.to_tracing_level_filter(),
            tracing::level_filters::LevelFilter::INFO
        );
    }

    #[test]
    fn test_log_level_drives_host_subscriber() {
        let config = EngineConfig::from_toml_str("[general]\nlog_level = \"error\"\n", "cfg.toml")
            .unwrap();
        let filter = config.general.log_level.to_tracing_level_filter();
        let subscriber = tracing_subscriber::fmt().with_max_level(filter).finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(tracing::Level::ERROR));
            assert!(!tracing::enabled!(tracing::Level::WARN));
        });
    }
}

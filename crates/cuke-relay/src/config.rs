//! Relay configuration parsed from environment variables.
//!
//! All settings can be overridden via environment variables prefixed with
//! `CUKE_RELAY_`, and again by command-line flags through
//! [`RelayConfig::apply_overrides`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;
use crate::options::RunSettings;

/// Log level enumeration matching tracing crate levels.
///
/// Defaults to `Info` when not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Most verbose logging, includes all trace spans.
    Trace,
    /// Debug-level information for development.
    Debug,
    /// Standard informational messages.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for failures.
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidConfig(format!(
                "unknown log level '{s}', expected one of: trace, debug, info, warn, error"
            ))),
        }
    }
}

impl LogLevel {
    /// Convert to a tracing filter directive string.
    #[must_use]
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Default debounce interval in milliseconds.
const DEFAULT_DEBOUNCE_MS: u64 = 300;
/// Default interval between spec directory scans in milliseconds.
const DEFAULT_POLL_MS: u64 = 250;
const DEFAULT_TESTS_PATH: &str = "tests";
const DEFAULT_FRAMEWORK: &str = "cucumber";
const DEFAULT_FORMAT: &str = "progress";
const DEFAULT_PROGRAM: [&str; 2] = ["node", "node_modules/.bin/cucumber-js"];
/// File suffixes watched below the framework directory.
const SPEC_SUFFIXES: &str = r"\.(feature|js|coffee|litcoffee|coffee\.md|rs)$";

/// Configuration for the relay.
///
/// # Environment Variables
///
/// - `CUKE_RELAY_LOG_LEVEL`: log level (trace, debug, info, warn, error)
/// - `CUKE_RELAY_DEBUG`: any non-empty value forces debug logging
/// - `CUKE_RELAY_DEBOUNCE_MS`: quiet period before a change triggers a run
/// - `CUKE_RELAY_POLL_MS`: interval between spec directory scans
/// - `CUKE_RELAY_TESTS_PATH`: root of the test tree
/// - `CUKE_RELAY_FRAMEWORK`: framework tag, also the directory name below
///   the test tree
/// - `CUKE_RELAY_PROGRAM`: whitespace-separated engine command
/// - `CUKE_RELAY_TAGS`: tag filters separated by `;`. Each filter is one
///   tag expression, so `@a,@b` keeps its legacy meaning of `@a or @b`.
///   Separate filters are combined with `and`.
/// - `CUKE_RELAY_FORMAT`: engine output format
/// - `CUKE_RELAY_REQUIRE`: support-code directory passed as `--require`
/// - `CUKE_RELAY_REPORT_URL`: base URL of the reporting service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: LogLevel,
    /// Debounce interval for spec change events in milliseconds.
    pub debounce_ms: u64,
    /// Interval between spec directory scans in milliseconds.
    pub poll_interval_ms: u64,
    /// Root of the test tree.
    pub tests_path: PathBuf,
    /// Framework tag attached to every report.
    pub framework: String,
    /// Program-identity tokens that start the engine.
    pub program: Vec<String>,
    /// Tag filters; empty runs everything.
    pub tags: Vec<String>,
    /// Engine output format; empty leaves the engine default.
    pub format: String,
    /// Optional support-code directory.
    pub require: Option<PathBuf>,
    /// Base URL of the reporting service.
    pub report_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_MS,
            tests_path: PathBuf::from(DEFAULT_TESTS_PATH),
            framework: DEFAULT_FRAMEWORK.to_string(),
            program: DEFAULT_PROGRAM.iter().map(ToString::to_string).collect(),
            tags: Vec::new(),
            format: DEFAULT_FORMAT.to_string(),
            require: None,
            report_url: None,
        }
    }
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Log level override.
    pub log_level: Option<LogLevel>,
    /// Debounce override in milliseconds.
    pub debounce_ms: Option<u64>,
    /// Test tree override.
    pub tests_path: Option<PathBuf>,
    /// Framework tag override.
    pub framework: Option<String>,
    /// Tag filters; replaces the configured list when non-empty.
    pub tags: Vec<String>,
    /// Output format override.
    pub format: Option<String>,
    /// Support-code directory override.
    pub require: Option<PathBuf>,
    /// Reporting service override.
    pub report_url: Option<String>,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConfig` if an environment variable contains
    /// an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Missing keys fall back to defaults. Empty values count as missing.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConfig` for unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let log_level = if get("CUKE_RELAY_DEBUG").is_some() {
            LogLevel::Debug
        } else {
            match get("CUKE_RELAY_LOG_LEVEL") {
                Some(val) => val.parse()?,
                None => defaults.log_level,
            }
        };

        let debounce_ms = match get("CUKE_RELAY_DEBOUNCE_MS") {
            Some(val) => parse_millis("debounce", &val)?,
            None => defaults.debounce_ms,
        };

        let poll_interval_ms = match get("CUKE_RELAY_POLL_MS") {
            Some(val) => parse_millis("poll", &val)?,
            None => defaults.poll_interval_ms,
        };
        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let program = match get("CUKE_RELAY_PROGRAM") {
            Some(val) => val.split_whitespace().map(ToString::to_string).collect(),
            None => defaults.program,
        };

        let tags = get("CUKE_RELAY_TAGS")
            .map(|val| split_filters(&val))
            .unwrap_or_default();

        Ok(Self {
            log_level,
            debounce_ms,
            poll_interval_ms,
            tests_path: get("CUKE_RELAY_TESTS_PATH").map_or(defaults.tests_path, PathBuf::from),
            framework: get("CUKE_RELAY_FRAMEWORK").unwrap_or(defaults.framework),
            program,
            tags,
            format: get("CUKE_RELAY_FORMAT").unwrap_or(defaults.format),
            require: get("CUKE_RELAY_REQUIRE").map(PathBuf::from),
            report_url: get("CUKE_RELAY_REPORT_URL"),
        })
    }

    /// Apply optional overrides to an existing configuration.
    ///
    /// This is intended for CLI overrides that should take precedence over
    /// environment-based defaults.
    #[must_use]
    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        if let Some(ms) = overrides.debounce_ms {
            self.debounce_ms = ms;
        }
        if let Some(path) = overrides.tests_path {
            self.tests_path = path;
        }
        if let Some(framework) = overrides.framework {
            self.framework = framework;
        }
        if !overrides.tags.is_empty() {
            self.tags = overrides.tags;
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        if overrides.require.is_some() {
            self.require = overrides.require;
        }
        if overrides.report_url.is_some() {
            self.report_url = overrides.report_url;
        }
        self
    }

    /// Create a new configuration with the specified log level.
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Directory holding the framework's feature files.
    #[must_use]
    pub fn features_path(&self) -> PathBuf {
        self.tests_path.join(&self.framework).join("features")
    }

    /// Quiet period applied to spec change bursts.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Interval between spec directory scans.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pattern selecting the files that belong to this framework.
    ///
    /// The pattern is matched against paths relative to
    /// [`tests_path`](Self::tests_path), using `/` separators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pattern`] if the framework name produces an
    /// invalid expression.
    pub fn framework_pattern(&self) -> Result<Regex, ConfigError> {
        let pattern = format!("^{}/.+{SPEC_SUFFIXES}", regex::escape(&self.framework));
        Ok(Regex::new(&pattern)?)
    }

    /// Static inputs for the run options builder.
    #[must_use]
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            program: self.program.clone(),
            spec_root: self.features_path(),
            require: self.require.clone(),
            tags: self.tags.clone(),
            format: self.format.clone(),
        }
    }
}

fn parse_millis(what: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse().map_err(|_| {
        ConfigError::InvalidConfig(format!(
            "invalid {what} value '{val}', expected a non-negative integer"
        ))
    })
}

fn split_filters(val: &str) -> Vec<String> {
    val.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests require explicit panic messages for debugging failures"
)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;
    use crate::options::RunOptions;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[rstest]
    #[case("trace", LogLevel::Trace)]
    #[case("debug", LogLevel::Debug)]
    #[case("INFO", LogLevel::Info)]
    #[case("warning", LogLevel::Warn)]
    #[case("Error", LogLevel::Error)]
    fn log_level_parses_valid_values(#[case] input: &str, #[case] expected: LogLevel) {
        assert_eq!(input.parse::<LogLevel>().ok(), Some(expected));
    }

    #[test]
    fn log_level_rejects_invalid_values() {
        let result = "invalid".parse::<LogLevel>();
        assert!(result.unwrap_err().to_string().contains("unknown log level"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.format, "progress");
        assert_eq!(config.program, ["node", "node_modules/.bin/cucumber-js"]);
        assert_eq!(
            config.features_path(),
            PathBuf::from("tests").join("cucumber").join("features")
        );
    }

    #[test]
    fn environment_values_are_applied() {
        let config = load(&[
            ("CUKE_RELAY_LOG_LEVEL", "warn"),
            ("CUKE_RELAY_DEBOUNCE_MS", "50"),
            ("CUKE_RELAY_TAGS", "@smoke; ~@wip;"),
            ("CUKE_RELAY_PROGRAM", "npx cucumber-js"),
            ("CUKE_RELAY_FORMAT", ""),
            ("CUKE_RELAY_REPORT_URL", "http://localhost:3000"),
        ])
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.tags, ["@smoke", "~@wip"]);
        assert_eq!(config.program, ["npx", "cucumber-js"]);
        assert_eq!(config.format, "progress");
        assert_eq!(config.report_url.as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn legacy_or_tags_stay_one_expression() {
        let config = load(&[("CUKE_RELAY_TAGS", "@a,@b")]).unwrap();
        assert_eq!(config.tags, ["@a,@b"]);
        let options = RunOptions::build(&config.run_settings());
        assert_eq!(options.tags(), Some("@a,@b"));
    }

    #[test]
    fn debug_switch_forces_debug_level() {
        let config = load(&[
            ("CUKE_RELAY_LOG_LEVEL", "error"),
            ("CUKE_RELAY_DEBUG", "1"),
        ])
        .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[rstest]
    #[case("CUKE_RELAY_DEBOUNCE_MS", "soon")]
    #[case("CUKE_RELAY_POLL_MS", "0")]
    #[case("CUKE_RELAY_LOG_LEVEL", "loud")]
    fn invalid_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let err = load(&[(key, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn apply_overrides_updates_selected_fields() {
        let config = RelayConfig::default().apply_overrides(ConfigOverrides {
            log_level: Some(LogLevel::Error),
            debounce_ms: Some(42),
            tags: vec!["@fast".to_string()],
            ..ConfigOverrides::default()
        });
        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(config.debounce_ms, 42);
        assert_eq!(config.tags, ["@fast"]);
        assert_eq!(config.format, "progress");

        let config = RelayConfig::default().apply_overrides(ConfigOverrides::default());
        assert_eq!(config, RelayConfig::default());
    }

    #[rstest]
    #[case("cucumber/features/sample.feature", true)]
    #[case("cucumber/features/step_definitions/steps.js", true)]
    #[case("cucumber/features/support/world.coffee.md", true)]
    #[case("cucumber/README.txt", false)]
    #[case("jasmine/spec.js", false)]
    #[case("cucumber/", false)]
    fn framework_pattern_selects_spec_files(#[case] path: &str, #[case] expected: bool) {
        let pattern = RelayConfig::default().framework_pattern().unwrap();
        assert_eq!(pattern.is_match(path), expected);
    }

    #[test]
    fn run_settings_carry_static_configuration() {
        let config = RelayConfig {
            tags: vec!["@smoke".to_string()],
            require: Some(PathBuf::from("steps")),
            ..RelayConfig::default()
        };
        let settings = config.run_settings();
        assert_eq!(settings.spec_root, config.features_path());
        assert_eq!(settings.tags, ["@smoke"]);
        assert_eq!(settings.require, Some(PathBuf::from("steps")));
    }
}

//! Configuration errors for the relay.
//!
//! Run-level failures have their own types next to the code that raises
//! them ([`crate::engine::EngineError`], [`crate::report::ReportError`],
//! [`crate::controller::RunError`]); this module covers what can go wrong
//! before anything is started.

use thiserror::Error;

/// Errors raised while assembling the relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured framework file pattern is not a valid regular
    /// expression.
    #[error("invalid framework pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_error_displays_message() {
        let error = ConfigError::InvalidConfig("unknown log level".to_string());
        assert_eq!(
            error.to_string(),
            "invalid configuration: unknown log level"
        );
    }

    #[test]
    fn pattern_error_converts_from_regex() {
        let Err(source) = regex::Regex::new("(") else {
            panic!("unbalanced group should not compile");
        };
        let error = ConfigError::from(source);
        assert!(error.to_string().starts_with("invalid framework pattern"));
    }
}

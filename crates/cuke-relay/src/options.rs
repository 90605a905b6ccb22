//! Engine argument list for a single run.
//!
//! [`RunOptions::build`] is a pure function of [`RunSettings`]. The token
//! order is fixed:
//!
//! 1. program-identity tokens (for example `node node_modules/.bin/cucumber-js`)
//! 2. the spec root path
//! 3. `--require <dir>`, when a support-code directory is configured
//! 4. `--tags <expr>`, when at least one tag filter is configured
//! 5. `--format <name>`, when the format is non-empty
//!
//! Absent or empty optional values are omitted entirely. Multiple tag filters
//! are combined into a single expression joined with `and`.

use std::path::{Path, PathBuf};

/// Flag introducing the support-code directory.
pub const REQUIRE_FLAG: &str = "--require";
/// Flag introducing the tag expression.
pub const TAGS_FLAG: &str = "--tags";
/// Flag introducing the output format.
pub const FORMAT_FLAG: &str = "--format";

/// Static inputs for [`RunOptions::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Program-identity tokens.
    pub program: Vec<String>,
    /// Root directory of the spec files.
    pub spec_root: PathBuf,
    /// Optional support-code directory.
    pub require: Option<PathBuf>,
    /// Tag filters; each entry is a tag or a tag expression.
    pub tags: Vec<String>,
    /// Output-format selector.
    pub format: String,
}

/// Ordered, immutable token list handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    tokens: Vec<String>,
    program_len: usize,
}

impl RunOptions {
    /// Build the token list for one run.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use cuke_relay::options::{RunOptions, RunSettings};
    ///
    /// let settings = RunSettings {
    ///     program: vec!["node".into(), "cucumber-js".into()],
    ///     spec_root: PathBuf::from("/specs"),
    ///     require: None,
    ///     tags: Vec::new(),
    ///     format: "progress".into(),
    /// };
    /// let options = RunOptions::build(&settings);
    /// assert_eq!(
    ///     options.tokens(),
    ///     ["node", "cucumber-js", "/specs", "--format", "progress"],
    /// );
    /// ```
    #[must_use]
    pub fn build(settings: &RunSettings) -> Self {
        let mut tokens = settings.program.clone();
        let program_len = tokens.len();

        tokens.push(settings.spec_root.to_string_lossy().into_owned());

        if let Some(require) = settings.require.as_ref() {
            tokens.push(REQUIRE_FLAG.to_string());
            tokens.push(require.to_string_lossy().into_owned());
        }

        let tags = join_tags(&settings.tags);
        if !tags.is_empty() {
            tokens.push(TAGS_FLAG.to_string());
            tokens.push(tags);
        }

        if !settings.format.is_empty() {
            tokens.push(FORMAT_FLAG.to_string());
            tokens.push(settings.format.clone());
        }

        Self {
            tokens,
            program_len,
        }
    }

    /// The full ordered token list.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The program-identity prefix.
    #[must_use]
    pub fn program(&self) -> &[String] {
        self.tokens.get(..self.program_len).unwrap_or_default()
    }

    /// Everything after the program-identity prefix.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        self.tokens.get(self.program_len..).unwrap_or_default()
    }

    /// Spec paths: the positional arguments before the first flag.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.arguments()
            .iter()
            .take_while(|token| !token.starts_with("--"))
            .map(Path::new)
    }

    /// Value following `--require`, if present.
    #[must_use]
    pub fn require(&self) -> Option<&Path> {
        self.flag_value(REQUIRE_FLAG).map(Path::new)
    }

    /// Value following `--tags`, if present.
    #[must_use]
    pub fn tags(&self) -> Option<&str> {
        self.flag_value(TAGS_FLAG)
    }

    /// Value following `--format`, if present.
    #[must_use]
    pub fn format(&self) -> Option<&str> {
        self.flag_value(FORMAT_FLAG)
    }

    fn flag_value(&self, flag: &str) -> Option<&str> {
        let args = self.arguments();
        args.iter()
            .position(|token| token == flag)
            .and_then(|index| args.get(index + 1))
            .map(String::as_str)
    }
}

fn join_tags(tags: &[String]) -> String {
    let parts: Vec<&str> = tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect();
    match parts.as_slice() {
        [] => String::new(),
        [single] => (*single).to_string(),
        many => many
            .iter()
            .map(|part| format!("({part})"))
            .collect::<Vec<_>>()
            .join(" and "),
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn settings() -> RunSettings {
        RunSettings {
            program: vec!["prog1".to_string(), "prog2".to_string()],
            spec_root: PathBuf::from("/specs"),
            require: None,
            tags: Vec::new(),
            format: "progress".to_string(),
        }
    }

    #[rstest]
    fn omits_tags_when_empty(settings: RunSettings) {
        let options = RunOptions::build(&settings);
        assert_eq!(
            options.tokens(),
            ["prog1", "prog2", "/specs", "--format", "progress"]
        );
        assert_eq!(options.tags(), None);
    }

    #[rstest]
    fn places_tags_before_format(mut settings: RunSettings) {
        settings.tags = vec!["@smoke".to_string()];
        let options = RunOptions::build(&settings);
        assert_eq!(
            options.tokens(),
            ["prog1", "prog2", "/specs", "--tags", "@smoke", "--format", "progress"]
        );
    }

    #[rstest]
    fn omits_empty_format(mut settings: RunSettings) {
        settings.format = String::new();
        let options = RunOptions::build(&settings);
        assert_eq!(options.tokens(), ["prog1", "prog2", "/specs"]);
        assert_eq!(options.format(), None);
    }

    #[rstest]
    fn require_precedes_tags(mut settings: RunSettings) {
        settings.require = Some(PathBuf::from("/specs/steps"));
        settings.tags = vec!["@a".to_string(), "not @b".to_string()];
        let options = RunOptions::build(&settings);
        assert_eq!(
            options.arguments(),
            [
                "/specs",
                "--require",
                "/specs/steps",
                "--tags",
                "(@a) and (not @b)",
                "--format",
                "progress"
            ]
        );
        assert_eq!(options.require(), Some(Path::new("/specs/steps")));
    }

    #[rstest]
    fn accessors_read_back_the_tokens(mut settings: RunSettings) {
        settings.tags = vec![" @wip ".to_string(), String::new()];
        let options = RunOptions::build(&settings);
        assert_eq!(options.program(), ["prog1", "prog2"]);
        assert_eq!(options.paths().collect::<Vec<_>>(), [Path::new("/specs")]);
        assert_eq!(options.tags(), Some("@wip"));
        assert_eq!(options.format(), Some("progress"));
    }

    #[rstest]
    fn building_twice_is_deterministic(settings: RunSettings) {
        assert_eq!(RunOptions::build(&settings), RunOptions::build(&settings));
    }
}

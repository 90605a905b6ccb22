//! Engine backed by an external cucumber-compatible command.
//!
//! The run's program tokens are executed as a child process with an extra
//! `--format json:<file>` argument. The child's own formatter output goes
//! straight to stdout; its stderr is forwarded to the log. Once the child
//! exits, the JSON file is parsed into a [`ResultTree`] and replayed to the
//! attached listeners inside the run's [`HostContext`].
//!
//! A non-zero exit status is not an error by itself: cucumber CLIs exit
//! non-zero whenever a scenario fails. Only a missing or malformed results
//! file fails the run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Engine, EngineError, HostContext, Listener, Listeners, Runtime};
use crate::options::{FORMAT_FLAG, RunOptions};
use crate::results::ResultTree;

const RESULTS_FILE: &str = "results.json";

/// Runs each test run as a child process.
#[derive(Debug, Clone, Default)]
pub struct CommandEngine {
    current_dir: Option<PathBuf>,
}

impl CommandEngine {
    /// Create an engine running commands in the process's working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands from `dir` instead.
    #[must_use]
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Check that `program` can be started by asking it for its version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyProgram`] or [`EngineError::Spawn`].
    pub async fn probe(&self, program: &[String]) -> Result<(), EngineError> {
        let (first, rest) = program.split_first().ok_or(EngineError::EmptyProgram)?;
        let mut command = Command::new(first);
        command
            .args(rest)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = self.current_dir.as_deref() {
            command.current_dir(dir);
        }
        let status = command
            .status()
            .await
            .map_err(|source| EngineError::Spawn {
                program: first.clone(),
                source,
            })?;
        debug!(program = %first, %status, "engine probe finished");
        Ok(())
    }
}

impl Engine for CommandEngine {
    type Runtime = CommandRuntime;

    fn configure(
        &self,
        options: &RunOptions,
        context: &HostContext,
    ) -> Result<Self::Runtime, EngineError> {
        if options.program().is_empty() {
            return Err(EngineError::EmptyProgram);
        }
        Ok(CommandRuntime {
            tokens: options.tokens().to_vec(),
            current_dir: self.current_dir.clone(),
            listeners: Listeners::default(),
            context: context.clone(),
        })
    }

    fn renders_own_output(&self) -> bool {
        true
    }
}

/// One configured child-process run.
#[derive(Debug)]
pub struct CommandRuntime {
    tokens: Vec<String>,
    current_dir: Option<PathBuf>,
    listeners: Listeners,
    context: HostContext,
}

impl CommandRuntime {
    /// Token list the child is started with, before the results argument.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl Runtime for CommandRuntime {
    fn attach_listener(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    async fn start(self) -> Result<(), EngineError> {
        let Self {
            tokens,
            current_dir,
            mut listeners,
            context,
        } = self;
        let (first, rest) = tokens.split_first().ok_or(EngineError::EmptyProgram)?;

        let scratch = tempfile::Builder::new().prefix("cuke-relay-").tempdir()?;
        let results = scratch.path().join(RESULTS_FILE);

        let mut command = Command::new(first);
        command
            .args(rest)
            .arg(FORMAT_FLAG)
            .arg(format!("json:{}", results.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = current_dir.as_deref() {
            command.current_dir(dir);
        }

        debug!(program = %first, args = ?rest, "starting engine process");
        let mut child = command.spawn().map_err(|source| EngineError::Spawn {
            program: first.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(program = %first, "{line}");
            }
        }

        let status = child.wait().await?;
        let tree = read_results(&results, &status.to_string()).await?;
        if !status.success() {
            debug!(%status, "engine reported failing scenarios");
        }

        context.enter(|| listeners.replay(&tree));
        Ok(())
    }
}

async fn read_results(path: &Path, status: &str) -> Result<ResultTree, EngineError> {
    let missing = || EngineError::MissingResults {
        status: status.to_string(),
        path: path.to_path_buf(),
    };
    let text = tokio::fs::read_to_string(path).await.map_err(|_| missing())?;
    if text.trim().is_empty() {
        return Err(missing());
    }
    Ok(ResultTree::from_json(&text)?)
}

//! The outbound call boundary.
//!
//! [`CompletionBackend`] is the seam to the concrete transport; the built-in
//! [`CliBackend`] shells out to a provider CLI (Claude Code by default) and
//! surfaces non-zero exits as [`RawFailure`]s. [`ApiCaller`] composes a
//! backend with a classifier and a retry policy into the one call sites use.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{ApiError, ErrorClassifier, RawFailure};
use crate::retry::RetryPolicy;

/// The transport that actually performs the outbound call.
///
/// Failures surface as [`RawFailure`]s carrying the error text plus whatever
/// status code and raw output the transport observed; classification and
/// retry happen above this trait.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Sends one prompt and returns the raw response text.
    async fn complete(&self, prompt: &str) -> Result<String, RawFailure>;
}

/// Backend that invokes a provider CLI as a subprocess.
#[derive(Clone, Debug)]
pub struct CliBackend {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CliBackend {
    /// Creates a backend around an arbitrary command. The prompt is appended
    /// as the final argument.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
        }
    }

    /// Creates a backend for the Claude Code CLI in non-interactive mode.
    pub fn claude() -> Self {
        Self::new("claude").with_args(["--print"])
    }

    /// Replaces the arguments passed before the prompt.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory for the subprocess.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// The command this backend invokes.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the command resolves on PATH.
    pub fn is_available(&self) -> bool {
        is_program_in_path(&self.command)
    }
}

#[async_trait]
impl CompletionBackend for CliBackend {
    async fn complete(&self, prompt: &str) -> Result<String, RawFailure> {
        if !self.is_available() {
            return Err(RawFailure::new(format!(
                "command '{}' not found in PATH",
                self.command
            )));
        }

        debug!(command = %self.command, "invoking provider CLI");

        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(prompt)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RawFailure::new(format!("failed to spawn {}: {}", self.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Some CLIs report errors on stdout; keep stderr as the message and
        // carry stdout along verbatim for the classifier.
        let mut failure = RawFailure::new(stderr).with_output(stdout);
        if let Some(code) = output.status.code() {
            failure = failure.with_returncode(code);
        }
        Err(failure)
    }
}

/// Outbound caller: backend + classifier + retry policy.
pub struct ApiCaller<B> {
    backend: B,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
}

impl<B: CompletionBackend> ApiCaller<B> {
    /// Creates a caller from its three collaborators.
    pub fn new(backend: B, classifier: ErrorClassifier, policy: RetryPolicy) -> Self {
        Self {
            backend,
            classifier,
            policy,
        }
    }

    /// Creates a caller for the Anthropic provider with default retry
    /// behavior.
    pub fn anthropic(backend: B) -> Self {
        Self::new(backend, ErrorClassifier::new("Anthropic"), RetryPolicy::default())
    }

    /// The classifier used for failures from this caller.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// The retry policy applied to calls.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends one prompt, retrying transient failures per the policy.
    ///
    /// Flip `cancel` to `true` to abandon the in-flight attempt and skip any
    /// remaining retries.
    pub async fn call(
        &self,
        prompt: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<String, ApiError> {
        self.policy
            .run(&self.classifier, cancel, |_attempt| self.backend.complete(prompt))
            .await
    }
}

/// Check if a program exists in PATH (cross-platform)
fn is_program_in_path(program: &str) -> bool {
    #[cfg(target_os = "windows")]
    let check_cmd = "where";
    #[cfg(not(target_os = "windows"))]
    let check_cmd = "which";

    std::process::Command::new(check_cmd)
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

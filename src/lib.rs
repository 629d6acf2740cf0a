//! Tendril - thin integration layer for LLM provider calls.
//!
//! Tendril invokes a provider (the Claude Code CLI by default), converts raw
//! failures into a typed error taxonomy, and retries the kinds worth
//! retrying with exponential backoff. Callers match on [`ErrorKind`] to
//! decide what to do: halt on credit exhaustion, wait out a rate limit,
//! report a malformed request.
//!
//! ```no_run
//! use tendril::{ApiCaller, CliBackend};
//! use tokio::sync::watch;
//!
//! # async fn demo() -> Result<(), tendril::ApiError> {
//! let caller = ApiCaller::anthropic(CliBackend::claude());
//! let (_cancel, cancel_rx) = watch::channel(false);
//! let response = caller.call("Summarize the release notes", cancel_rx).await?;
//! println!("{response}");
//! # Ok(())
//! # }
//! ```

pub mod caller;
pub mod error;
pub mod logging;
pub mod retry;
pub mod settings;

pub use caller::{ApiCaller, CliBackend, CompletionBackend};
pub use error::{ApiError, Details, ErrorClassifier, ErrorKind, ErrorPattern, RawFailure};
pub use retry::{RetryDecision, RetryPolicy};
pub use settings::{Settings, SettingsError};

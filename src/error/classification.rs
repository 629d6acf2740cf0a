//! Typed error values for LLM provider failures.
//!
//! Every failure that crosses the provider boundary ends up as an [`ApiError`]
//! carrying exactly one [`ErrorKind`], a human-readable message, and an
//! insertion-ordered map of structured details. Callers branch on the kind to
//! decide user-facing behavior (halt on credit exhaustion, surface a banner on
//! a transient failure, and so on).

use std::fmt;

use serde_json::Value;

/// Structured key/value context attached to an error.
///
/// Backed by `serde_json::Map` with the `preserve_order` feature, so details
/// render in the order they were inserted.
pub type Details = serde_json::Map<String, Value>;

/// Fallback used when an error is constructed with a blank message.
const EMPTY_MESSAGE_FALLBACK: &str = "provider call failed without a diagnostic message";

/// The kind of a classified provider failure.
///
/// Kinds are fieldless so they can be collected into a `HashSet<ErrorKind>`
/// when configuring which kinds a retry policy considers retryable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unclassified application-level error.
    Generic,
    /// Billing quota exhausted. Fatal; retrying would waste quota.
    CreditBalanceExhausted,
    /// Rate limit hit (HTTP 429 or equivalent phrasing). Retryable.
    RateLimited,
    /// Network, timeout, or server-side failure that may resolve on retry.
    Transient,
    /// Caller-side malformed request (HTTP 4xx other than rate limits).
    /// Fatal; the same request would fail again.
    InvalidRequest,
    /// No known pattern matched. Treated as fatal by default, since
    /// retrying an unrecognized failure risks masking a real bug.
    Unknown,
}

impl ErrorKind {
    /// Stable lowercase name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Generic => "generic",
            ErrorKind::CreditBalanceExhausted => "credit_balance_exhausted",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether a retry policy retries this kind out of the box.
    pub fn default_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed provider failure: one kind, a message, and structured details.
///
/// Constructed at the point of failure detection and returned immediately;
/// not mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiError {
    /// The classified kind of this failure.
    pub kind: ErrorKind,
    /// Human-readable message. Never empty.
    pub message: String,
    /// Structured context, rendered in insertion order.
    pub details: Details,
    /// Provider label for billing-related failures (e.g. "Anthropic").
    pub service: Option<String>,
}

impl ApiError {
    /// Creates an error of the given kind.
    ///
    /// A blank message is replaced with a synthetic one so the non-empty
    /// message invariant holds for every constructed error.
    pub fn new(kind: ErrorKind, message: impl Into<String>, details: Details) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            EMPTY_MESSAGE_FALLBACK.to_string()
        } else {
            message
        };
        Self {
            kind,
            message,
            details,
            service: None,
        }
    }

    /// Creates an unclassified application-level error.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message, Details::new())
    }

    /// Creates an unknown error, preserving the message as-is.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message, Details::new())
    }

    /// Creates a credit-exhaustion error tagged with the provider it
    /// originated from.
    pub fn credit_exhausted(
        service: impl Into<String>,
        message: impl Into<String>,
        details: Details,
    ) -> Self {
        Self::new(ErrorKind::CreditBalanceExhausted, message, details).with_service(service)
    }

    /// Attaches a detail entry, preserving insertion order.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Tags the error with the provider it originated from.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Looks up a detail entry by key.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// Whether this kind is retried by a default retry policy.
    pub fn is_retryable_by_default(&self) -> bool {
        self.kind.default_retryable()
    }
}

impl fmt::Display for ApiError {
    /// Renders as `"{message} (k1=v1, k2=v2)"`, or just the message when
    /// there are no details. Shared by every kind; no variant overrides it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if self.details.is_empty() {
            return Ok(());
        }
        f.write_str(" (")?;
        for (i, (key, value)) in self.details.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                // Strings render bare, without JSON quoting.
                Value::String(s) => write!(f, "{}={}", key, s)?,
                other => write!(f, "{}={}", key, other)?,
            }
        }
        f.write_str(")")
    }
}

impl std::error::Error for ApiError {}

/// The untyped signal from a failed external call.
///
/// Produced once per failed attempt, handed to the classifier exactly once,
/// then discarded.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFailure {
    /// Error text, typically the process stderr or an HTTP error body.
    pub message: String,
    /// Process exit code or HTTP status, when one exists.
    pub returncode: Option<i32>,
    /// Raw stdout / response body captured alongside the failure.
    pub output: Option<String>,
}

impl RawFailure {
    /// Creates a raw failure from its error text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            returncode: None,
            output: None,
        }
    }

    /// Attaches the process exit code or HTTP status.
    pub fn with_returncode(mut self, code: i32) -> Self {
        self.returncode = Some(code);
        self
    }

    /// Attaches the raw output captured alongside the failure.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.returncode {
            Some(code) => write!(f, "{} [exit code {}]", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_details_in_insertion_order() {
        let error = ApiError::generic("boom").with_detail("a", 1).with_detail("b", 2);
        assert_eq!(error.to_string(), "boom (a=1, b=2)");
    }

    #[test]
    fn test_render_without_details() {
        let error = ApiError::generic("boom");
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn test_render_string_values_unquoted() {
        let error = ApiError::unknown("call failed").with_detail("stage", "handshake");
        assert_eq!(error.to_string(), "call failed (stage=handshake)");
    }

    #[test]
    fn test_render_order_follows_insertion_not_alphabet() {
        let error = ApiError::generic("boom").with_detail("z", 1).with_detail("a", 2);
        assert_eq!(error.to_string(), "boom (z=1, a=2)");
    }

    #[test]
    fn test_blank_message_replaced() {
        let error = ApiError::new(ErrorKind::Unknown, "   ", Details::new());
        assert_eq!(error.message, EMPTY_MESSAGE_FALLBACK);
    }

    #[test]
    fn test_credit_exhausted_carries_service() {
        let error =
            ApiError::credit_exhausted("Anthropic", "Credit balance is too low", Details::new());
        assert_eq!(error.kind, ErrorKind::CreditBalanceExhausted);
        assert_eq!(error.service.as_deref(), Some("Anthropic"));
    }

    #[test]
    fn test_default_retryability() {
        assert!(ErrorKind::RateLimited.default_retryable());
        assert!(ErrorKind::Transient.default_retryable());
        assert!(!ErrorKind::CreditBalanceExhausted.default_retryable());
        assert!(!ErrorKind::InvalidRequest.default_retryable());
        assert!(!ErrorKind::Unknown.default_retryable());
        assert!(!ErrorKind::Generic.default_retryable());
    }

    #[test]
    fn test_detail_lookup() {
        let error = ApiError::generic("boom").with_detail("returncode", 1);
        assert_eq!(error.detail("returncode"), Some(&Value::from(1)));
        assert_eq!(error.detail("missing"), None);
    }

    #[test]
    fn test_raw_failure_display() {
        let failure = RawFailure::new("rate limit exceeded").with_returncode(1);
        assert_eq!(failure.to_string(), "rate limit exceeded [exit code 1]");
        assert_eq!(RawFailure::new("boom").to_string(), "boom");
    }

    #[test]
    fn test_error_clone_and_equality() {
        let error = ApiError::generic("boom").with_detail("key", "value");
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}

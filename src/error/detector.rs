//! Pattern-based classification of raw provider failures.
//!
//! The classifier maps the text of a failed call (plus its optional exit code
//! and raw output) to exactly one [`ErrorKind`]. Patterns are checked in a
//! fixed priority order so the first match wins and no two kinds can claim
//! the same input. Classification runs inside error-handling paths, so it
//! never fails itself: anything unmatched degrades to [`ErrorKind::Unknown`].

use regex::Regex;

use super::classification::{ApiError, Details, ErrorKind, RawFailure};

/// Synthetic message used when a failure arrives with no text at all.
const EMPTY_FAILURE_MESSAGE: &str = "provider call failed without any diagnostic output";

/// A single classification rule: a compiled regex and the kind it maps to.
#[derive(Debug)]
pub struct ErrorPattern {
    regex: Regex,
    kind: ErrorKind,
    description: String,
}

impl ErrorPattern {
    /// Creates a new pattern.
    ///
    /// # Panics
    /// Panics if the regex is invalid. The built-in pattern table is fixed at
    /// compile time, so this only concerns callers installing custom rules.
    pub fn new(pattern: &str, kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            regex: Regex::new(pattern).expect("invalid classification regex"),
            kind,
            description: description.into(),
        }
    }

    /// The kind assigned when this pattern matches.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description of what this pattern detects.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether this pattern matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Classifies raw failures from one provider into typed errors.
#[derive(Debug)]
pub struct ErrorClassifier {
    provider: String,
    patterns: Vec<ErrorPattern>,
}

impl ErrorClassifier {
    /// Creates a classifier for the given provider label (e.g. "Anthropic")
    /// with the built-in pattern table.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            patterns: Self::default_patterns(),
        }
    }

    /// Creates a classifier with a custom pattern table.
    pub fn with_patterns(provider: impl Into<String>, patterns: Vec<ErrorPattern>) -> Self {
        Self {
            provider: provider.into(),
            patterns,
        }
    }

    /// The provider label stamped onto billing-related errors.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Appends a custom pattern. It is checked after the built-in ones.
    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.patterns.push(pattern);
    }

    /// Returns the number of configured patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// The built-in rules, in priority order. Credit exhaustion outranks
    /// rate limiting, which outranks transient network conditions, which
    /// outrank generic 4xx handling. The 429 rules sit above the catch-all
    /// 4xx rule, so a rate-limit status never classifies as InvalidRequest.
    fn default_patterns() -> Vec<ErrorPattern> {
        vec![
            // Credit / quota exhaustion - fatal, must never be retried
            ErrorPattern::new(
                r"(?i)credit\s+balance\s+is\s+too\s+low",
                ErrorKind::CreditBalanceExhausted,
                "Credit balance exhausted",
            ),
            ErrorPattern::new(
                r"(?i)insufficient\s+credits?",
                ErrorKind::CreditBalanceExhausted,
                "Insufficient credits",
            ),
            // Rate limiting
            ErrorPattern::new(r"(?i)\b429\b", ErrorKind::RateLimited, "HTTP 429 status code"),
            ErrorPattern::new(
                r"(?i)\brate[\s_-]?limit",
                ErrorKind::RateLimited,
                "Rate limit message",
            ),
            ErrorPattern::new(
                r"(?i)too\s+many\s+requests",
                ErrorKind::RateLimited,
                "Too many requests",
            ),
            // Transient network / server conditions
            ErrorPattern::new(
                r"(?i)connection\s*(refused|reset|closed|timed?\s*out)",
                ErrorKind::Transient,
                "Connection failure",
            ),
            ErrorPattern::new(
                r"(?i)network\s*(error|failure|unreachable)",
                ErrorKind::Transient,
                "Network failure",
            ),
            ErrorPattern::new(r"(?i)\btimed?\s*out\b", ErrorKind::Transient, "Timeout"),
            ErrorPattern::new(
                r"(?i)service\s+unavailable",
                ErrorKind::Transient,
                "Service unavailable",
            ),
            ErrorPattern::new(r"(?i)\boverloaded\b", ErrorKind::Transient, "Provider overloaded"),
            ErrorPattern::new(
                r"(?i)\b5[0-9]{2}\b",
                ErrorKind::Transient,
                "HTTP 5xx server error",
            ),
            // Malformed requests (4xx other than 429, which matched above)
            ErrorPattern::new(
                r"(?i)invalid\s+request",
                ErrorKind::InvalidRequest,
                "Invalid request",
            ),
            ErrorPattern::new(r"(?i)bad\s+request", ErrorKind::InvalidRequest, "Bad request"),
            ErrorPattern::new(r"(?i)malformed", ErrorKind::InvalidRequest, "Malformed input"),
            ErrorPattern::new(
                r"(?i)\b4[0-9]{2}\b",
                ErrorKind::InvalidRequest,
                "HTTP 4xx status code",
            ),
        ]
    }

    /// Classifies a raw failure into exactly one typed error.
    ///
    /// Never fails: unmatched input yields [`ErrorKind::Unknown`] with the
    /// original message preserved exactly, and a failure with no text at all
    /// yields Unknown with a synthetic message.
    pub fn classify(&self, failure: &RawFailure) -> ApiError {
        // Classify on the error text; fall back to the raw output when the
        // message itself is blank.
        let text = if failure.message.trim().is_empty() {
            failure.output.as_deref().unwrap_or("")
        } else {
            failure.message.as_str()
        };

        if text.trim().is_empty() {
            let error = ApiError::unknown(EMPTY_FAILURE_MESSAGE);
            return self.attach_raw_context(error, failure);
        }

        match self.patterns.iter().find(|p| p.matches(text)) {
            Some(pattern) => {
                let mut error = ApiError::new(
                    pattern.kind(),
                    failure.message.trim_end(),
                    Details::new(),
                );
                if pattern.kind() == ErrorKind::CreditBalanceExhausted {
                    error = error.with_service(&self.provider);
                }
                error = self.attach_raw_context(error, failure);
                error.with_detail("pattern", pattern.description())
            }
            // Unknown preserves the message untouched so no information is
            // lost on the way up.
            None => {
                let error = ApiError::unknown(failure.message.clone());
                self.attach_raw_context(error, failure)
            }
        }
    }

    /// Re-examines an already-typed error.
    ///
    /// A specific kind is kept as-is, which makes classification idempotent.
    /// Generic and Unknown errors get their message re-run through the
    /// pattern table in case a caller wrapped a classifiable failure.
    pub fn classify_error(&self, error: &ApiError) -> ApiError {
        match error.kind {
            ErrorKind::Generic | ErrorKind::Unknown => {
                match self.patterns.iter().find(|p| p.matches(&error.message)) {
                    Some(pattern) => {
                        let mut refined = ApiError::new(
                            pattern.kind(),
                            error.message.clone(),
                            error.details.clone(),
                        );
                        if pattern.kind() == ErrorKind::CreditBalanceExhausted {
                            refined = refined.with_service(&self.provider);
                        }
                        refined
                    }
                    None => error.clone(),
                }
            }
            _ => error.clone(),
        }
    }

    /// Copies the exit code and raw output of the failure into the error
    /// details, verbatim.
    fn attach_raw_context(&self, mut error: ApiError, failure: &RawFailure) -> ApiError {
        if let Some(code) = failure.returncode {
            error = error.with_detail("returncode", code);
        }
        if let Some(output) = &failure.output {
            error = error.with_detail("output", output.as_str());
        }
        error
    }
}

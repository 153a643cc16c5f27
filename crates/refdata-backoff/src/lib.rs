#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-backoff** – Bounded exponential backoff and the shared error
//! classification every retry loop in the write path consults.
//!
//! [`BackoffPolicy`] is a direct port of the reference platform's
//! `ARQUtils::BackoffPolicy` spec-string grammar
//! (`"initial-multiplier-maxDelay[-maxAttempts]"`), rebuilt as an owned,
//! `Copy`-free struct with a mutable attempt counter rather than a
//! throwing constructor. [`ErrorClass`] is a shared error taxonomy: every
//! fallible operation in `refdata-executor`/`refdata-audit` classifies its
//! error into one of four retry shapes, and callers match on the class
//! rather than downcasting concrete error types.

use std::fmt;
use std::time::Duration;

//─────────────────────────────
//  Error classification
//─────────────────────────────

/// The four retry shapes every write-path error reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retriable, non-fatal; already retried internally by the library.
    /// Surfaces here only once the library's own retry budget is spent.
    Transient,
    /// The in-flight transaction must be aborted; the caller retries the
    /// batch from the last committed position (the broker redelivers).
    TransactionAbortRequired,
    /// Non-retriable: fencing, authorization, or a corrupted invariant.
    /// The caller must log critically and exit.
    Fatal,
    /// Scoped to a single message within a batch (bad header, unknown
    /// entity, codec failure). Routed to DLQ; the batch proceeds.
    PerMessage,
}

/// Implemented by error types that can state their own retry shape.
pub trait Classify {
    /// This error's [`ErrorClass`].
    fn error_class(&self) -> ErrorClass;
}

//─────────────────────────────
//  BackoffPolicy
//─────────────────────────────

/// Structured configuration for [`BackoffPolicy`], independent of the
/// string grammar used to construct one at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSpec {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Growth factor applied per attempt (`1.0` for constant delay).
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Optional cap on the number of attempts; `None` means unbounded.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffSpec {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 4.0,
            max_delay: Duration::from_secs(5),
            max_attempts: Some(10),
        }
    }
}

/// Errors produced parsing a [`BackoffPolicy`] specification string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackoffParseError {
    /// Fewer than the required `initial-multiplier-maxDelay` tokens.
    #[error("invalid backoff policy string: expected 'initial-multiplier-max[-limit]', got {0} element(s)")]
    TooFewTokens(usize),
    /// A duration token was neither a bare integer nor `<int><s|m|ms>`.
    #[error("invalid backoff policy string: couldn't parse '{0}' as a duration")]
    BadDuration(String),
    /// The multiplier token was neither `CONSTANT` nor a valid float.
    #[error("invalid backoff policy string: couldn't parse multiplier token '{0}' as a number")]
    BadMultiplier(String),
    /// The optional max-attempts token was not a valid non-negative integer.
    #[error("invalid backoff policy string: couldn't parse limit token '{0}' as a non-negative integer")]
    BadMaxAttempts(String),
}

/// A bounded exponential backoff policy with an internal attempt counter.
///
/// `nextDelay()` returns `initial * multiplier^attempts`, capped at
/// `maxDelay`; it increments the attempt counter each call and returns
/// `None` once `maxAttempts` is reached. `reset()` zeroes the counter,
/// called after a successful operation or before starting a fresh retry
/// sequence.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    spec: BackoffSpec,
    attempts: u32,
}

impl BackoffPolicy {
    /// Construct a policy from a structured [`BackoffSpec`].
    pub fn new(spec: BackoffSpec) -> Self {
        Self { spec, attempts: 0 }
    }

    /// Parse `"initial-multiplier-maxDelay[-maxAttempts]"`, e.g.
    /// `"100ms-2.0-10s"` or `"500ms-1.5-1m-5"`.
    pub fn parse(spec_str: &str) -> Result<Self, BackoffParseError> {
        let tokens: Vec<&str> = spec_str.split('-').collect();
        if tokens.len() < 3 {
            return Err(BackoffParseError::TooFewTokens(tokens.len()));
        }

        let initial = parse_duration(tokens[0])?;
        let max_delay = parse_duration(tokens[2])?;
        let multiplier = if tokens[1] == "CONSTANT" {
            1.0
        } else {
            tokens[1]
                .parse::<f64>()
                .map_err(|_| BackoffParseError::BadMultiplier(tokens[1].to_string()))?
        };
        let max_attempts = match tokens.get(3) {
            Some(tok) => Some(
                tok.parse::<u32>().map_err(|_| BackoffParseError::BadMaxAttempts(tok.to_string()))?,
            ),
            None => None,
        };

        Ok(Self::new(BackoffSpec { initial, multiplier, max_delay, max_attempts }))
    }

    /// The delay for the next attempt, or `None` once `maxAttempts` has
    /// been reached. Advances the internal attempt counter as a side
    /// effect.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.spec.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let delay_ms = self.spec.initial.as_secs_f64() * 1000.0 * self.spec.multiplier.powi(self.attempts as i32);
        let capped = Duration::from_secs_f64(delay_ms / 1000.0).min(self.spec.max_delay);
        self.attempts += 1;
        Some(capped)
    }

    /// Zero the attempt counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// The structured spec this policy was built from, e.g. to hand off
    /// to a collaborator that builds its own fresh [`BackoffPolicy`] per
    /// retry sequence rather than sharing this one's attempt counter.
    pub fn spec(&self) -> BackoffSpec {
        self.spec
    }

    /// Number of attempts consumed since construction or the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.spec.max_attempts {
            Some(max) => write!(f, "attempt {}/{}", self.attempts, max),
            None => write!(f, "attempt {}/inf", self.attempts),
        }
    }
}

fn parse_duration(token: &str) -> Result<Duration, BackoffParseError> {
    let (digits, suffix) = match token.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => token.split_at(idx),
        None => (token, ""),
    };
    let value: u64 = digits.parse().map_err(|_| BackoffParseError::BadDuration(token.to_string()))?;
    match suffix {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(BackoffParseError::BadDuration(token.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_milliseconds_seconds_and_minutes() {
        assert_eq!(parse_duration("100").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_unknown_duration_suffix() {
        assert!(matches!(parse_duration("10x"), Err(BackoffParseError::BadDuration(_))));
    }

    #[test]
    fn parses_full_spec_string_with_max_attempts() {
        let policy = BackoffPolicy::parse("500ms-1.5-1m-5").unwrap();
        assert_eq!(policy.spec.initial, Duration::from_millis(500));
        assert_eq!(policy.spec.multiplier, 1.5);
        assert_eq!(policy.spec.max_delay, Duration::from_secs(60));
        assert_eq!(policy.spec.max_attempts, Some(5));
    }

    #[test]
    fn parses_spec_string_without_max_attempts_as_unbounded() {
        let policy = BackoffPolicy::parse("100ms-2.0-10s").unwrap();
        assert_eq!(policy.spec.max_attempts, None);
    }

    #[test]
    fn constant_multiplier_keyword_maps_to_one() {
        let policy = BackoffPolicy::parse("5s-CONSTANT-5s").unwrap();
        assert_eq!(policy.spec.multiplier, 1.0);
    }

    #[test]
    fn too_few_tokens_is_rejected() {
        assert!(matches!(BackoffPolicy::parse("100ms-2.0"), Err(BackoffParseError::TooFewTokens(2))));
    }

    #[test]
    fn next_delay_grows_geometrically_then_caps() {
        let mut policy = BackoffPolicy::parse("100ms-2.0-1s").unwrap();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
        // Would be 1600ms uncapped; clamps to maxDelay.
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn next_delay_returns_none_once_max_attempts_reached() {
        let mut policy = BackoffPolicy::parse("10ms-CONSTANT-10ms-2").unwrap();
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_zeroes_the_attempt_counter() {
        let mut policy = BackoffPolicy::parse("10ms-CONSTANT-10ms-1").unwrap();
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.next_delay(), None);
        policy.reset();
        assert!(policy.next_delay().is_some());
    }

    #[test]
    fn display_shows_bounded_and_unbounded_progress() {
        let mut bounded = BackoffPolicy::parse("10ms-CONSTANT-10ms-5").unwrap();
        bounded.next_delay();
        assert_eq!(bounded.to_string(), "attempt 1/5");

        let mut unbounded = BackoffPolicy::parse("10ms-CONSTANT-10ms").unwrap();
        unbounded.next_delay();
        assert_eq!(unbounded.to_string(), "attempt 1/inf");
    }
}

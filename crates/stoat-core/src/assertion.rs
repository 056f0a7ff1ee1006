//! Assertion records and error matchers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TestError;

/// The kind of check an assertion performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Assert,
    Is,
    Not,
    DeepEqual,
    NotDeepEqual,
    Throws,
    NotThrows,
    Pass,
    Fail,
    Snapshot,
}

impl AssertionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionKind::Assert => "assert",
            AssertionKind::Is => "is",
            AssertionKind::Not => "not",
            AssertionKind::DeepEqual => "deep_equal",
            AssertionKind::NotDeepEqual => "not_deep_equal",
            AssertionKind::Throws => "throws",
            AssertionKind::NotThrows => "not_throws",
            AssertionKind::Pass => "pass",
            AssertionKind::Fail => "fail",
            AssertionKind::Snapshot => "snapshot",
        }
    }
}

/// Outcome of a single check. Append-only per test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub kind: AssertionKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of a failed assertion: the kind, the caller's message, and the
/// rendered actual/expected forms where the check had them.
#[derive(Debug, Clone)]
pub struct AssertionFailure {
    pub kind: AssertionKind,
    pub message: Option<String>,
    pub actual: Option<String>,
    pub expected: Option<String>,
}

impl AssertionFailure {
    pub fn new(kind: AssertionKind, message: Option<&str>) -> Self {
        Self {
            kind,
            message: message.map(str::to_string),
            actual: None,
            expected: None,
        }
    }

    pub fn with_values(mut self, actual: impl Into<String>, expected: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self.expected = Some(expected.into());
        self
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} assertion failed", self.kind.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, " ({msg})")?;
        }
        if let (Some(actual), Some(expected)) = (&self.actual, &self.expected) {
            write!(f, ": actual {actual}, expected {expected}")?;
        }
        Ok(())
    }
}

/// How `throws`/`not_throws` decide whether a raised error was the one the
/// caller expected.
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    /// Exact match on the error's rendered message.
    Message(String),
    /// Match on the error kind name (see [`TestError::kind_name`]).
    Kind(String),
    /// Regex match against the rendered message.
    Pattern(Regex),
}

impl ErrorMatcher {
    pub fn message(s: impl Into<String>) -> Self {
        ErrorMatcher::Message(s.into())
    }

    pub fn kind(s: impl Into<String>) -> Self {
        ErrorMatcher::Kind(s.into())
    }

    /// Build a pattern matcher; an invalid pattern is reported as a plain
    /// failure on the calling test rather than a panic.
    pub fn pattern(re: &str) -> Result<Self, TestError> {
        Regex::new(re)
            .map(ErrorMatcher::Pattern)
            .map_err(|e| TestError::failure(format!("invalid error pattern '{re}': {e}")))
    }

    pub fn matches(&self, err: &TestError) -> bool {
        match self {
            ErrorMatcher::Message(expected) => err.to_string() == *expected,
            ErrorMatcher::Kind(kind) => err.kind_name() == kind,
            ErrorMatcher::Pattern(re) => re.is_match(&err.to_string()),
        }
    }
}

impl fmt::Display for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMatcher::Message(s) => write!(f, "an error with message {s:?}"),
            ErrorMatcher::Kind(k) => write!(f, "an error of kind '{k}'"),
            ErrorMatcher::Pattern(re) => write!(f, "an error matching /{re}/"),
        }
    }
}

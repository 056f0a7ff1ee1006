//! Error types shared across the runtime.

use thiserror::Error;

use crate::assertion::AssertionFailure;

/// Result alias for operations that can fail a test run.
pub type CoreResult<T> = Result<T, TestError>;

/// Registration-time errors. Raised when a suite is assembled, before
/// anything runs.
#[derive(Debug, Clone, Error)]
pub enum RegisterError {
    #[error("duplicate test name '{name}' in '{origin}'")]
    DuplicateName { origin: String, name: String },
}

/// Everything that can go wrong inside one test run.
///
/// Assertion failures are the only "soft" kind: the `failing` modifier
/// inverts them. Every other kind is a hard failure regardless of modifier.
#[derive(Debug, Clone, Error)]
pub enum TestError {
    #[error("{0}")]
    Assertion(AssertionFailure),

    #[error("plan already set for this test")]
    PlanAlreadySet,

    #[error("planned {planned} assertions but {actual} were made")]
    PlanMismatch { planned: usize, actual: usize },

    #[error("test timed out after {0}ms")]
    Timeout(u64),

    #[error("virtual clock stalled after {0} steps without settling")]
    ClockStalled(usize),

    #[error("virtual clock handle used after its owning test settled")]
    ClockRevoked,

    #[error("mock invoked after its owning test settled")]
    TornDownMock,

    #[error("lock acquisition failed: {0}")]
    LockAcquisition(String),

    #[error("test panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Failure(String),
}

impl TestError {
    /// Free-form failure, for user errors propagated out of test bodies.
    pub fn failure(message: impl Into<String>) -> Self {
        TestError::Failure(message.into())
    }

    /// Stable kind name used by [`crate::assertion::ErrorMatcher::Kind`].
    pub fn kind_name(&self) -> &'static str {
        match self {
            TestError::Assertion(_) => "assertion",
            TestError::PlanAlreadySet => "plan_already_set",
            TestError::PlanMismatch { .. } => "plan_mismatch",
            TestError::Timeout(_) => "timeout",
            TestError::ClockStalled(_) => "clock_stalled",
            TestError::ClockRevoked => "clock_revoked",
            TestError::TornDownMock => "torn_down_mock",
            TestError::LockAcquisition(_) => "lock_acquisition",
            TestError::Panic(_) => "panic",
            TestError::Failure(_) => "failure",
        }
    }

    /// Whether this error came from an assertion check rather than the
    /// machinery around it.
    pub fn is_assertion(&self) -> bool {
        matches!(self, TestError::Assertion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{AssertionFailure, AssertionKind};

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(TestError::Timeout(10).kind_name(), "timeout");
        assert_eq!(TestError::TornDownMock.kind_name(), "torn_down_mock");
    }

    #[test]
    fn only_assertions_are_soft() {
        let soft = TestError::Assertion(AssertionFailure::new(AssertionKind::Fail, None));
        assert!(soft.is_assertion());
        assert!(!TestError::Panic("boom".into()).is_assertion());
    }
}

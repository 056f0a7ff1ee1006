//! # Stoat Core
//!
//! Shared data model for the stoat test runtime: the dynamic [`Value`]
//! domain, test case metadata, assertion records, error kinds, and report
//! types. The execution engine lives in `stoat-runner`; the virtual clock,
//! lock coordinator, and mock registry build on the types defined here.

#![warn(clippy::all)]

pub mod assertion;
pub mod case;
pub mod error;
pub mod report;
pub mod value;

pub use assertion::{Assertion, AssertionFailure, AssertionKind, ErrorMatcher};
pub use case::{CaseMeta, Modifier};
pub use error::{CoreResult, RegisterError, TestError};
pub use report::{CaseReport, CaseStatus, FailureInfo, SuiteReport};
pub use value::{Value, canonical, deep_equal, same_value};

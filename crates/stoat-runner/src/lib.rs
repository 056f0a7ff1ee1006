//! # Stoat Runner
//!
//! The execution engine of the stoat test runtime. A [`TestRegistry`]
//! collects immutable [`TestCase`]s at registration time; the
//! [`Scheduler`] dispatches them concurrently under modifier policy,
//! enforces per-test deadlines, runs teardown chains, and aggregates the
//! suite verdict. Each running test sees one [`Context`], its façade over
//! assertions, named locks, the virtual clock, mocks, and snapshots.

#![warn(clippy::all)]

pub mod case;
pub mod config;
pub mod context;
pub mod scheduler;
pub mod snapshot;

pub use case::{BodyResult, TestBody, TestCase, TestRegistry};
pub use config::RunnerConfig;
pub use context::Context;
pub use scheduler::Scheduler;
pub use snapshot::{MemorySnapshots, SnapshotStore};

// The rest of the runtime, re-exported for consumers.
pub use stoat_clock::{ClockHandle, ClockScheduler, ClockService};
pub use stoat_core::{
    Assertion, AssertionFailure, AssertionKind, CaseMeta, CaseReport, CaseStatus, CoreResult,
    ErrorMatcher, FailureInfo, Modifier, RegisterError, SuiteReport, TestError, Value,
};
pub use stoat_lock::{ArbiterServer, ChannelArbiter, LocalArbiter, LockArbiter, LockCoordinator, LockGuard};
pub use stoat_mock::{CallRecord, MemberTable, MockFn, MockRegistry, ObjectTable, Spy, Stub};

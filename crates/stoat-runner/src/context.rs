//! Per-test execution context: assertions, planning, teardown, and access
//! to the shared lock, clock, mock, and snapshot facilities.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use stoat_clock::{ClockHandle, ClockOwnership, ClockService};
use stoat_core::assertion::{Assertion, AssertionFailure, AssertionKind, ErrorMatcher};
use stoat_core::case::CaseMeta;
use stoat_core::error::{CoreResult, TestError};
use stoat_core::value::{Value, canonical, deep_equal, same_value};
use stoat_lock::{LockCoordinator, LockGuard};
use stoat_mock::{MemberTable, MockFn, MockRegistry, Spy, Stub};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::case::BodyResult;
use crate::snapshot::SnapshotStore;

/// Registered teardown callback, run after the test settles.
pub(crate) type TeardownFn = Box<dyn FnOnce() -> BoxFuture<'static, BodyResult> + Send>;

/// Mutable per-run state. Owned by the scheduler; mutated only through the
/// run's [`Context`].
pub(crate) struct RunState {
    pub assertions: Vec<Assertion>,
    pub first_failure: Option<AssertionFailure>,
    /// First non-assertion error: panic, timeout, plan misuse, body error.
    pub hard_error: Option<TestError>,
    /// Failures appended after the body settled (teardown errors).
    pub extra_errors: Vec<TestError>,
    pub planned: Option<usize>,
    pub teardowns: Vec<TeardownFn>,
    pub locks: Vec<LockGuard>,
    pub clock_handle: Option<ClockHandle>,
    pub clock_ownership: Option<ClockOwnership>,
    snapshot_sites: u32,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            assertions: Vec::new(),
            first_failure: None,
            hard_error: None,
            extra_errors: Vec::new(),
            planned: None,
            teardowns: Vec::new(),
            locks: Vec::new(),
            clock_handle: None,
            clock_ownership: None,
            snapshot_sites: 0,
        }
    }

    pub fn set_hard_error(&mut self, err: TestError) {
        if self.hard_error.is_none() {
            self.hard_error = Some(err);
        }
    }
}

/// Adjustable absolute deadline with a waitable expiry.
pub(crate) struct DeadlineState {
    at: Mutex<Instant>,
    changed: Notify,
}

impl DeadlineState {
    pub fn new(at: Instant) -> Self {
        Self {
            at: Mutex::new(at),
            changed: Notify::new(),
        }
    }

    pub fn get(&self) -> Instant {
        *self.at.lock()
    }

    pub fn set(&self, at: Instant) {
        *self.at.lock() = at;
        self.changed.notify_waiters();
    }

    /// Resolves once the deadline has passed, tracking adjustments made
    /// while waiting.
    pub async fn expired(&self) {
        loop {
            let notified = self.changed.notified();
            let at = self.get();
            if at <= Instant::now() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(at) => {
                    if self.get() <= Instant::now() {
                        return;
                    }
                }
                _ = notified => {}
            }
        }
    }
}

/// Shared facilities every run in the process reaches through its context.
pub(crate) struct RunServices {
    pub locks: LockCoordinator,
    pub clock: Arc<ClockService>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

/// Isolated per-test façade. Cheap to clone; every clone mutates the same
/// run.
#[derive(Clone)]
pub struct Context {
    meta: Arc<CaseMeta>,
    state: Arc<Mutex<RunState>>,
    deadline: Arc<DeadlineState>,
    services: Arc<RunServices>,
    mocks: Arc<MockRegistry>,
}

impl Context {
    pub(crate) fn new(
        meta: Arc<CaseMeta>,
        state: Arc<Mutex<RunState>>,
        deadline: Arc<DeadlineState>,
        services: Arc<RunServices>,
        mocks: Arc<MockRegistry>,
    ) -> Self {
        Self {
            meta,
            state,
            deadline,
            services,
            mocks,
        }
    }

    /// Name of the test this context belongs to.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    fn record_pass(&self, kind: AssertionKind, message: Option<&str>) {
        self.state.lock().assertions.push(Assertion {
            kind,
            ok: true,
            message: message.map(str::to_string),
        });
    }

    fn record_fail(&self, failure: AssertionFailure) {
        let mut st = self.state.lock();
        st.assertions.push(Assertion {
            kind: failure.kind,
            ok: false,
            message: failure.message.clone(),
        });
        if st.first_failure.is_none() {
            st.first_failure = Some(failure);
        }
    }

    /// Declare the exact number of assertions this run will make. Checked
    /// once, when the run completes. A second call fails the run.
    pub fn plan(&self, count: usize) {
        let mut st = self.state.lock();
        if st.planned.is_some() {
            st.set_hard_error(TestError::PlanAlreadySet);
        } else {
            st.planned = Some(count);
        }
    }

    /// Succeeds iff `value` is true.
    pub fn assert(&self, value: bool, message: Option<&str>) -> bool {
        if value {
            self.record_pass(AssertionKind::Assert, message);
        } else {
            self.record_fail(AssertionFailure::new(AssertionKind::Assert, message));
        }
        value
    }

    /// Same-value identity: `NaN` equals `NaN`, `+0` and `-0` differ.
    pub fn is(&self, actual: &Value, expected: &Value, message: Option<&str>) -> bool {
        let ok = same_value(actual, expected);
        if ok {
            self.record_pass(AssertionKind::Is, message);
        } else {
            self.record_fail(
                AssertionFailure::new(AssertionKind::Is, message)
                    .with_values(canonical(actual), canonical(expected)),
            );
        }
        ok
    }

    /// Negated same-value identity.
    pub fn not(&self, actual: &Value, expected: &Value, message: Option<&str>) -> bool {
        let ok = !same_value(actual, expected);
        if ok {
            self.record_pass(AssertionKind::Not, message);
        } else {
            self.record_fail(
                AssertionFailure::new(AssertionKind::Not, message)
                    .with_values(canonical(actual), format!("not {}", canonical(expected))),
            );
        }
        ok
    }

    /// Structural equality over nested and cyclic containers.
    pub fn deep_equal(&self, actual: &Value, expected: &Value, message: Option<&str>) -> bool {
        let ok = deep_equal(actual, expected);
        if ok {
            self.record_pass(AssertionKind::DeepEqual, message);
        } else {
            self.record_fail(
                AssertionFailure::new(AssertionKind::DeepEqual, message)
                    .with_values(canonical(actual), canonical(expected)),
            );
        }
        ok
    }

    /// Negated structural equality.
    pub fn not_deep_equal(&self, actual: &Value, expected: &Value, message: Option<&str>) -> bool {
        let ok = !deep_equal(actual, expected);
        if ok {
            self.record_pass(AssertionKind::NotDeepEqual, message);
        } else {
            self.record_fail(
                AssertionFailure::new(AssertionKind::NotDeepEqual, message).with_values(
                    canonical(actual),
                    format!("anything but {}", canonical(expected)),
                ),
            );
        }
        ok
    }

    /// Unconditional success.
    pub fn pass(&self, message: Option<&str>) {
        self.record_pass(AssertionKind::Pass, message);
    }

    /// Unconditional failure.
    pub fn fail(&self, message: Option<&str>) {
        self.record_fail(AssertionFailure::new(AssertionKind::Fail, message));
    }

    /// Succeeds iff `f` raises an error matching `expected` (any error when
    /// no matcher is given). The raised error is returned for inspection.
    pub fn throws(
        &self,
        f: impl FnOnce() -> CoreResult<Value>,
        expected: Option<&ErrorMatcher>,
        message: Option<&str>,
    ) -> Option<TestError> {
        self.settle_throws(f(), expected, message)
    }

    /// Deferred mirror of [`throws`](Self::throws): suspends until the
    /// computation settles and matches against its rejection.
    pub async fn throws_async<F>(
        &self,
        fut: F,
        expected: Option<&ErrorMatcher>,
        message: Option<&str>,
    ) -> Option<TestError>
    where
        F: Future<Output = CoreResult<Value>>,
    {
        self.settle_throws(fut.await, expected, message)
    }

    fn settle_throws(
        &self,
        result: CoreResult<Value>,
        expected: Option<&ErrorMatcher>,
        message: Option<&str>,
    ) -> Option<TestError> {
        match result {
            Err(err) => {
                match expected {
                    Some(matcher) if !matcher.matches(&err) => {
                        self.record_fail(
                            AssertionFailure::new(AssertionKind::Throws, message)
                                .with_values(err.to_string(), matcher.to_string()),
                        );
                    }
                    _ => self.record_pass(AssertionKind::Throws, message),
                }
                Some(err)
            }
            Ok(value) => {
                self.record_fail(
                    AssertionFailure::new(AssertionKind::Throws, message).with_values(
                        format!("no error (returned {})", canonical(&value)),
                        "an error".to_string(),
                    ),
                );
                None
            }
        }
    }

    /// Succeeds iff `f` raises no error; returns the produced value.
    pub fn not_throws(
        &self,
        f: impl FnOnce() -> CoreResult<Value>,
        message: Option<&str>,
    ) -> Option<Value> {
        self.settle_not_throws(f(), message)
    }

    /// Deferred mirror of [`not_throws`](Self::not_throws).
    pub async fn not_throws_async<F>(&self, fut: F, message: Option<&str>) -> Option<Value>
    where
        F: Future<Output = CoreResult<Value>>,
    {
        self.settle_not_throws(fut.await, message)
    }

    fn settle_not_throws(&self, result: CoreResult<Value>, message: Option<&str>) -> Option<Value> {
        match result {
            Ok(value) => {
                self.record_pass(AssertionKind::NotThrows, message);
                Some(value)
            }
            Err(err) => {
                self.record_fail(
                    AssertionFailure::new(AssertionKind::NotThrows, message)
                        .with_values(err.to_string(), "no error".to_string()),
                );
                None
            }
        }
    }

    /// Compare `value` against the stored baseline for this test and call
    /// site; the first sighting stores the baseline and passes.
    pub fn snapshot(&self, value: &Value, message: Option<&str>) -> bool {
        let site = {
            let mut st = self.state.lock();
            let site = st.snapshot_sites;
            st.snapshot_sites += 1;
            site
        };
        let test = self.meta.qualified_name();
        let serialized = canonical(value);
        match self.services.snapshots.load(&test, site) {
            None => {
                self.services.snapshots.store(&test, site, serialized);
                self.record_pass(AssertionKind::Snapshot, message);
                true
            }
            Some(baseline) if baseline == serialized => {
                self.record_pass(AssertionKind::Snapshot, message);
                true
            }
            Some(baseline) => {
                self.record_fail(
                    AssertionFailure::new(AssertionKind::Snapshot, message)
                        .with_values(serialized, baseline),
                );
                false
            }
        }
    }

    /// Register a callback to run after the test settles. Teardowns run in
    /// reverse registration order.
    pub fn teardown<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        self.state
            .lock()
            .teardowns
            .push(Box::new(move || Box::pin(f())));
    }

    /// Suspend until this run is sole holder of the lock named by `key`.
    /// The guard auto-releases when the run settles.
    pub async fn lock(&self, key: &Value) -> CoreResult<LockGuard> {
        let guard = self.services.locks.acquire(key).await?;
        self.state.lock().locks.push(guard.clone());
        Ok(guard)
    }

    /// Suspend until this run owns the process's virtual clock. Repeated
    /// calls from the same run return the same handle.
    pub async fn clock(&self) -> CoreResult<ClockHandle> {
        if let Some(handle) = self.state.lock().clock_handle.clone() {
            return Ok(handle);
        }
        let (handle, ownership) = self.services.clock.acquire().await;
        let mut st = self.state.lock();
        st.clock_handle = Some(handle.clone());
        st.clock_ownership = Some(ownership);
        Ok(handle)
    }

    /// Create a call-recording stub, torn down when the run settles.
    pub fn stub(&self, target: Option<MockFn>) -> CoreResult<Stub> {
        self.mocks.stub(target)
    }

    /// Replace `member` on `target` with a recording wrapper; the original
    /// binding is restored when the run settles.
    pub fn spy(&self, target: Arc<dyn MemberTable>, member: &str, f: MockFn) -> CoreResult<Spy> {
        self.mocks.spy(target, member, f)
    }

    /// Run `fut` with the deadline extended to at least `ms` from now. On
    /// exit the remaining budget reverts to what it was on entry: time
    /// consumed inside the scope is forgiven, never banked.
    pub async fn timeout<T, F>(&self, ms: u64, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let entry = Instant::now();
        let entry_deadline = self.deadline.get();
        let remaining = entry_deadline.saturating_duration_since(entry);
        let extended = entry + Duration::from_millis(ms);
        if extended > entry_deadline {
            self.deadline.set(extended);
        }
        let out = fut.await;
        self.deadline.set(Instant::now() + remaining);
        out
    }
}

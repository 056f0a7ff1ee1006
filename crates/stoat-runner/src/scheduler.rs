//! Test scheduler: modifier policy, concurrency, deadlines, teardown, and
//! suite aggregation.

use parking_lot::Mutex;
use std::sync::Arc;
use stoat_clock::ClockService;
use stoat_core::assertion::Assertion;
use stoat_core::case::Modifier;
use stoat_core::error::TestError;
use stoat_core::report::{CaseReport, CaseStatus, SuiteReport};
use stoat_lock::{LocalArbiter, LockArbiter, LockCoordinator};
use stoat_mock::MockRegistry;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::case::{TestCase, TestRegistry};
use crate::config::RunnerConfig;
use crate::context::{Context, DeadlineState, RunServices, RunState, TeardownFn};
use crate::snapshot::{MemorySnapshots, SnapshotStore};

/// Owns dispatch and aggregation for one process. Tests reach shared
/// facilities (locks, the virtual clock, snapshots) through the services
/// the scheduler wires into their contexts.
pub struct Scheduler {
    config: RunnerConfig,
    arbiter: Arc<dyn LockArbiter>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<ClockService>,
}

impl Scheduler {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            arbiter: Arc::new(LocalArbiter::new()),
            snapshots: Arc::new(MemorySnapshots::new()),
            clock: Arc::new(ClockService::new()),
        }
    }

    /// Use a shared arbiter endpoint, connecting this process's locks to
    /// the rest of the run.
    pub fn with_arbiter(mut self, arbiter: Arc<dyn LockArbiter>) -> Self {
        self.arbiter = arbiter;
        self
    }

    /// Use an external snapshot store.
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Execute every registered case and aggregate the suite result.
    pub async fn run(&self, registry: TestRegistry) -> SuiteReport {
        let cases = registry.into_cases();

        // Debug is a scheduling-wide override, evaluated once before
        // dispatch: if any case carries it, only debug cases execute.
        let debug_only = cases
            .iter()
            .any(|case| case.meta.modifier == Modifier::Debug);
        if debug_only {
            tracing::debug!("debug cases present; suppressing all other cases");
        }

        let mut suite = SuiteReport::new();
        let mut runnable: Vec<TestCase> = Vec::new();
        for case in cases {
            let modifier = case.meta.modifier;
            if debug_only && modifier != Modifier::Debug {
                suite.record(
                    CaseReport::unexecuted(case.meta.name.as_str(), modifier, CaseStatus::Skipped),
                    false,
                );
            } else if modifier == Modifier::Skip {
                suite.record(
                    CaseReport::unexecuted(case.meta.name.as_str(), modifier, CaseStatus::Skipped),
                    false,
                );
            } else if modifier == Modifier::Todo && !case.has_body() {
                suite.record(
                    CaseReport::unexecuted(case.meta.name.as_str(), modifier, CaseStatus::Todo),
                    false,
                );
            } else {
                runnable.push(case);
            }
        }

        // Required cases are dispatched before any other case begins; the
        // sort is stable, so registration order holds within each group.
        runnable.sort_by_key(|case| case.meta.modifier != Modifier::Required);

        let services = Arc::new(RunServices {
            locks: LockCoordinator::new(Arc::clone(&self.arbiter)),
            clock: Arc::clone(&self.clock),
            snapshots: Arc::clone(&self.snapshots),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.worker_limit.max(1)));
        let mut tasks = JoinSet::new();
        for case in runnable {
            // Take the permit before spawning so dispatch order is strict.
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .expect("scheduler semaphore closed");
            let config = self.config.clone();
            let services = Arc::clone(&services);
            tasks.spawn(async move {
                let _permit = permit;
                run_case(case, config, services).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    let counted =
                        counts_toward_exit(report.modifier, self.config.tolerate_failures);
                    suite.record(report, counted);
                }
                Err(e) => tracing::warn!("test task failed to join: {e}"),
            }
        }

        tracing::info!(
            passed = suite.passed,
            failed = suite.failed,
            skipped = suite.skipped,
            todo = suite.todo,
            exit_code = suite.exit_code,
            "suite finished"
        );
        suite
    }
}

/// Whether a failure of a case with this modifier flips the exit code.
fn counts_toward_exit(modifier: Modifier, tolerate_failures: bool) -> bool {
    match modifier {
        Modifier::Required => true,
        m if !m.counts_toward_verdict() => false,
        _ => !tolerate_failures,
    }
}

async fn run_case(
    case: TestCase,
    config: RunnerConfig,
    services: Arc<RunServices>,
) -> CaseReport {
    let meta = Arc::new(case.meta.clone());
    let start = Instant::now();
    tracing::debug!(test = %meta.name, modifier = %meta.modifier, "dispatching test");

    let state = Arc::new(Mutex::new(RunState::new()));
    let deadline = Arc::new(DeadlineState::new(start + config.default_timeout()));
    let mocks = Arc::new(MockRegistry::new());
    let ctx = Context::new(
        Arc::clone(&meta),
        Arc::clone(&state),
        Arc::clone(&deadline),
        Arc::clone(&services),
        Arc::clone(&mocks),
    );

    let mut timed_out = false;
    if let Some(body) = case.body.clone() {
        let params = case.params.clone();
        let body_ctx = ctx.clone();
        // The body runs on its own task so a panic is contained and a
        // timed-out body can be abandoned without awaiting settlement.
        let mut handle = tokio::spawn(async move { body(body_ctx, params).await });
        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => record_body_error(&state, err),
                Err(join_err) => {
                    state.lock().set_hard_error(TestError::Panic(panic_message(join_err)));
                }
            },
            _ = deadline.expired() => {
                handle.abort();
                timed_out = true;
                state
                    .lock()
                    .set_hard_error(TestError::Timeout(config.default_timeout_ms));
                tracing::warn!(test = %meta.name, "test timed out");
            }
        }
    }

    // Teardowns run in reverse registration order, each bounded by the
    // grace window; one failing does not stop the rest.
    let teardowns: Vec<TeardownFn> = {
        let mut st = state.lock();
        let mut teardowns = std::mem::take(&mut st.teardowns);
        teardowns.reverse();
        teardowns
    };
    let grace = config.teardown_grace(timed_out);
    for teardown in teardowns {
        match tokio::time::timeout(grace, teardown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(test = %meta.name, error = %err, "teardown failed");
                state
                    .lock()
                    .extra_errors
                    .push(TestError::failure(format!("teardown failed: {err}")));
            }
            Err(_) => {
                state.lock().extra_errors.push(TestError::failure(format!(
                    "teardown timed out after {}ms",
                    grace.as_millis()
                )));
            }
        }
    }

    // Settle instrumentation and shared resources: mocks reject further
    // calls, spied bindings restore, held locks and the clock free up.
    mocks.settle();
    {
        let mut st = state.lock();
        for guard in st.locks.drain(..) {
            guard.release();
        }
        st.clock_handle = None;
        st.clock_ownership = None;
    }

    // Plan accounting happens exactly once, at completion.
    {
        let mut st = state.lock();
        if let Some(planned) = st.planned {
            let actual = st.assertions.len();
            if planned != actual && st.hard_error.is_none() {
                st.hard_error = Some(TestError::PlanMismatch { planned, actual });
            }
        }
    }

    let (report, has_hard) = {
        let mut st = state.lock();
        let assertions = std::mem::take(&mut st.assertions);
        let assertion_failed = assertions.iter().any(|a| !a.ok);
        let has_hard = st.hard_error.is_some() || !st.extra_errors.is_empty();
        let status = if timed_out {
            CaseStatus::TimedOut
        } else if has_hard || assertion_failed {
            CaseStatus::Failed
        } else {
            CaseStatus::Passed
        };
        let error = st
            .hard_error
            .clone()
            .map(|e| e.to_string())
            .or_else(|| st.first_failure.clone().map(|f| f.to_string()))
            .or_else(|| st.extra_errors.first().map(|e| e.to_string()));
        (
            CaseReport {
                name: meta.name.clone(),
                modifier: meta.modifier,
                status,
                assertions,
                duration_ms: start.elapsed().as_millis() as u64,
                error,
            },
            has_hard,
        )
    };

    let report = apply_failing_inversion(report, has_hard);
    tracing::debug!(test = %meta.name, status = ?report.status, "test settled");
    report
}

/// The `failing` modifier inverts the verdict, but only for assertion
/// failures: a hard error (panic, timeout, plan misuse, teardown failure)
/// still fails the suite, and so does an unexpected pass.
fn apply_failing_inversion(mut report: CaseReport, has_hard: bool) -> CaseReport {
    if report.modifier != Modifier::Failing {
        return report;
    }
    match report.status {
        CaseStatus::Passed => {
            report.status = CaseStatus::Failed;
            report.error = Some("test was expected to fail but passed".to_string());
        }
        CaseStatus::Failed if !has_hard => {
            report.status = CaseStatus::Passed;
            report.error = None;
        }
        _ => {}
    }
    report
}

fn record_body_error(state: &Arc<Mutex<RunState>>, err: TestError) {
    let mut st = state.lock();
    match err {
        // An assertion error propagated out of the body joins the
        // assertion log; everything else is a hard failure.
        TestError::Assertion(failure) => {
            st.assertions.push(Assertion {
                kind: failure.kind,
                ok: false,
                message: failure.message.clone(),
            });
            if st.first_failure.is_none() {
                st.first_failure = Some(failure);
            }
        }
        other => st.set_hard_error(other),
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}

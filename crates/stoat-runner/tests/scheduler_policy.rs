//! End-to-end scheduler behavior: modifier policy, dispatch order,
//! deadlines, and suite verdicts.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use stoat_runner::{
    CaseReport, CaseStatus, Modifier, RunnerConfig, Scheduler, SuiteReport, TestCase, TestError,
    TestRegistry,
};

fn config(worker_limit: usize) -> RunnerConfig {
    RunnerConfig {
        worker_limit,
        default_timeout_ms: 5_000,
        teardown_grace_ms: 500,
        ..RunnerConfig::default()
    }
}

fn passing(name: &str, modifier: Modifier) -> TestCase {
    TestCase::new("suite", name, modifier, |ctx, _| async move {
        ctx.pass(None);
        Ok(())
    })
}

fn failing_assert(name: &str, modifier: Modifier) -> TestCase {
    TestCase::new("suite", name, modifier, |ctx, _| async move {
        ctx.fail(Some("forced"));
        Ok(())
    })
}

fn case_report<'a>(suite: &'a SuiteReport, name: &str) -> &'a CaseReport {
    suite
        .cases
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no report for '{name}'"))
}

#[tokio::test]
async fn mixed_suite_aggregates_and_sets_exit_code() {
    let mut registry = TestRegistry::new();
    registry.register(passing("ok", Modifier::Normal)).expect("register");
    registry
        .register(failing_assert("bad", Modifier::Normal))
        .expect("register");
    registry
        .register(TestCase::todo("suite", "later"))
        .expect("register");

    let suite = Scheduler::new(config(4)).run(registry).await;
    assert_eq!(suite.total, 3);
    assert_eq!(suite.passed, 1);
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.todo, 1);
    assert_eq!(suite.exit_code, 1);
    assert_eq!(suite.failures.len(), 1);
    assert_eq!(suite.failures[0].name, "bad");

    let json = suite.to_json().expect("report serializes");
    assert!(json.contains("\"exit_code\": 1"));
}

#[tokio::test]
async fn skip_cases_never_execute() {
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let mut registry = TestRegistry::new();
    registry
        .register(TestCase::new(
            "suite",
            "skipped",
            Modifier::Skip,
            move |_ctx, _| {
                let r = Arc::clone(&r);
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ))
        .expect("register");

    let suite = Scheduler::new(config(1)).run(registry).await;
    assert_eq!(suite.skipped, 1);
    assert_eq!(suite.exit_code, 0);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn debug_cases_suppress_everything_else() {
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let mut registry = TestRegistry::new();
    registry
        .register(TestCase::new(
            "suite",
            "ordinary",
            Modifier::Normal,
            move |ctx, _| {
                let r = Arc::clone(&r);
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    ctx.pass(None);
                    Ok(())
                }
            },
        ))
        .expect("register");
    registry
        .register(passing("focused", Modifier::Debug))
        .expect("register");

    let suite = Scheduler::new(config(4)).run(registry).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0, "non-debug case must not run");
    assert_eq!(case_report(&suite, "ordinary").status, CaseStatus::Skipped);
    assert_eq!(case_report(&suite, "focused").status, CaseStatus::Passed);
    assert_eq!(suite.exit_code, 0);
}

#[tokio::test]
async fn ignore_failures_are_listed_but_tolerated() {
    let mut registry = TestRegistry::new();
    registry
        .register(failing_assert("observed", Modifier::Ignore))
        .expect("register");

    let suite = Scheduler::new(config(1)).run(registry).await;
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.failures.len(), 1);
    assert_eq!(suite.exit_code, 0);
}

#[tokio::test]
async fn failing_modifier_inverts_assertion_failures() {
    let mut registry = TestRegistry::new();
    registry
        .register(failing_assert("expected_to_fail", Modifier::Failing))
        .expect("register");

    let suite = Scheduler::new(config(1)).run(registry).await;
    assert_eq!(
        case_report(&suite, "expected_to_fail").status,
        CaseStatus::Passed
    );
    assert_eq!(suite.exit_code, 0);
}

#[tokio::test]
async fn failing_modifier_flags_an_unexpected_pass() {
    let mut registry = TestRegistry::new();
    registry
        .register(passing("should_have_failed", Modifier::Failing))
        .expect("register");

    let suite = Scheduler::new(config(1)).run(registry).await;
    let report = case_report(&suite, "should_have_failed");
    assert_eq!(report.status, CaseStatus::Failed);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|e| e.contains("expected to fail"))
    );
    assert_eq!(suite.exit_code, 1);
}

#[tokio::test]
async fn failing_modifier_keeps_hard_errors_fatal() {
    let mut registry = TestRegistry::new();
    registry
        .register(TestCase::new(
            "suite",
            "hard_error",
            Modifier::Failing,
            |_ctx, _| async { Err(TestError::failure("broken fixture")) },
        ))
        .expect("register");

    let suite = Scheduler::new(config(1)).run(registry).await;
    assert_eq!(case_report(&suite, "hard_error").status, CaseStatus::Failed);
    assert_eq!(suite.exit_code, 1);
}

#[tokio::test]
async fn required_cases_dispatch_before_all_others() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TestRegistry::new();
    for (name, modifier) in [
        ("first_registered", Modifier::Normal),
        ("second_registered", Modifier::Normal),
        ("must_run_first", Modifier::Required),
    ] {
        let order = Arc::clone(&order);
        registry
            .register(TestCase::new("suite", name, modifier, move |ctx, _| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(ctx.name().to_string());
                    ctx.pass(None);
                    Ok(())
                }
            }))
            .expect("register");
    }

    let suite = Scheduler::new(config(1)).run(registry).await;
    assert_eq!(suite.passed, 3);
    assert_eq!(
        *order.lock(),
        vec!["must_run_first", "first_registered", "second_registered"]
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_abandons_the_body_and_still_tears_down() {
    let body_finished = Arc::new(AtomicBool::new(false));
    let torn_down = Arc::new(AtomicBool::new(false));
    let finished = Arc::clone(&body_finished);
    let teardown_flag = Arc::clone(&torn_down);

    let mut registry = TestRegistry::new();
    registry
        .register(TestCase::new(
            "suite",
            "sleeper",
            Modifier::Normal,
            move |ctx, _| {
                let finished = Arc::clone(&finished);
                let teardown_flag = Arc::clone(&teardown_flag);
                async move {
                    let teardown_flag = Arc::clone(&teardown_flag);
                    ctx.teardown(move || async move {
                        teardown_flag.store(true, Ordering::SeqCst);
                        Ok(())
                    });
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
        ))
        .expect("register");

    let config = RunnerConfig {
        worker_limit: 1,
        default_timeout_ms: 100,
        teardown_grace_ms: 400,
        ..RunnerConfig::default()
    };
    let suite = Scheduler::new(config).run(registry).await;
    let report = case_report(&suite, "sleeper");
    assert_eq!(report.status, CaseStatus::TimedOut);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out"))
    );
    assert!(!body_finished.load(Ordering::SeqCst), "body was abandoned");
    assert!(torn_down.load(Ordering::SeqCst), "teardown still ran");
    assert_eq!(suite.exit_code, 1);
}

#[tokio::test]
async fn body_panic_is_contained_to_its_own_run() {
    let mut registry = TestRegistry::new();
    registry
        .register(TestCase::new(
            "suite",
            "panics",
            Modifier::Normal,
            |_ctx, _| async {
                panic!("boom");
            },
        ))
        .expect("register");
    registry
        .register(passing("survives", Modifier::Normal))
        .expect("register");

    let suite = Scheduler::new(config(2)).run(registry).await;
    let report = case_report(&suite, "panics");
    assert_eq!(report.status, CaseStatus::Failed);
    assert!(report.error.as_deref().is_some_and(|e| e.contains("boom")));
    assert_eq!(case_report(&suite, "survives").status, CaseStatus::Passed);
}

#[tokio::test]
async fn tolerate_failures_spares_normal_but_not_required() {
    let tolerant = RunnerConfig {
        tolerate_failures: true,
        ..config(2)
    };

    let mut registry = TestRegistry::new();
    registry
        .register(failing_assert("flaky", Modifier::Normal))
        .expect("register");
    let suite = Scheduler::new(tolerant.clone()).run(registry).await;
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.exit_code, 0, "normal failures are tolerated");

    let mut registry = TestRegistry::new();
    registry
        .register(failing_assert("gatekeeper", Modifier::Required))
        .expect("register");
    let suite = Scheduler::new(tolerant).run(registry).await;
    assert_eq!(suite.exit_code, 1, "required failures never are");
}

#[tokio::test]
async fn todo_with_body_runs_but_cannot_fail_the_suite() {
    let mut registry = TestRegistry::new();
    registry
        .register(failing_assert("documented", Modifier::Todo))
        .expect("register");

    let suite = Scheduler::new(config(1)).run(registry).await;
    assert_eq!(case_report(&suite, "documented").status, CaseStatus::Failed);
    assert_eq!(suite.exit_code, 0);
}

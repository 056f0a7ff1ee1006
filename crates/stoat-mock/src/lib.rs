//! # Stoat Mock
//!
//! Call-recording instrumentation owned by one test run. A [`Stub`] wraps
//! an optional inner function and logs every invocation; a [`Spy`]
//! additionally replaces a named member on a [`MemberTable`] target and
//! restores the original binding when the owning run settles. Once the
//! [`MockRegistry`] settles, every instrument it created rejects further
//! calls instead of silently recording.

#![warn(clippy::all)]

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stoat_core::error::{CoreResult, TestError};
use stoat_core::value::Value;

/// The instrumentable function shape: an explicit `this` binding plus
/// positional arguments.
pub type MockFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> CoreResult<Value> + Send + Sync>;

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub this: Option<Value>,
    pub args: Vec<Value>,
    pub outcome: Result<Value, TestError>,
}

struct StubInner {
    target: Option<MockFn>,
    calls: Mutex<Vec<CallRecord>>,
    torn_down: AtomicBool,
}

/// Call-recording wrapper around an optional inner function. With no inner
/// function it behaves as a recording no-op returning null.
#[derive(Clone)]
pub struct Stub {
    inner: Arc<StubInner>,
}

impl Stub {
    fn new(target: Option<MockFn>) -> Self {
        Self {
            inner: Arc::new(StubInner {
                target,
                calls: Mutex::new(Vec::new()),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Invoke the wrapped function, recording the call. Errors from the
    /// inner function are recorded and then propagated.
    pub fn call(&self, this: Option<&Value>, args: &[Value]) -> CoreResult<Value> {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(TestError::TornDownMock);
        }
        let outcome = match &self.inner.target {
            Some(f) => f(this, args),
            None => Ok(Value::Null),
        };
        self.inner.calls.lock().push(CallRecord {
            this: this.cloned(),
            args: args.to_vec(),
            outcome: outcome.clone(),
        });
        outcome
    }

    /// The ordered call log.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().len()
    }

    fn tear_down(&self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
    }
}

/// Capability a spy target must expose: a mutable named-member map.
pub trait MemberTable: Send + Sync {
    fn member(&self, name: &str) -> Option<MockFn>;
    fn set_member(&self, name: &str, f: MockFn);
}

/// Plain member table backed by a hash map.
#[derive(Default)]
pub struct ObjectTable {
    members: RwLock<HashMap<String, MockFn>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke a member through the table, as production code under test
    /// would.
    pub fn invoke(&self, name: &str, this: Option<&Value>, args: &[Value]) -> CoreResult<Value> {
        match self.member(name) {
            Some(f) => f(this, args),
            None => Err(TestError::failure(format!("no such member '{name}'"))),
        }
    }
}

impl MemberTable for ObjectTable {
    fn member(&self, name: &str) -> Option<MockFn> {
        self.members.read().get(name).cloned()
    }

    fn set_member(&self, name: &str, f: MockFn) {
        self.members.write().insert(name.to_string(), f);
    }
}

struct SpyInner {
    stub: Stub,
    target: Arc<dyn MemberTable>,
    member: String,
    original: MockFn,
    restored: AtomicBool,
}

/// A stub installed over a live object member. The original binding stays
/// reachable through [`original`](Self::original) and is restored exactly
/// once when the owning run settles.
#[derive(Clone)]
pub struct Spy {
    inner: Arc<SpyInner>,
}

impl Spy {
    fn install(target: Arc<dyn MemberTable>, member: &str, f: MockFn) -> CoreResult<Self> {
        let original = target.member(member).ok_or_else(|| {
            TestError::failure(format!("cannot spy on missing member '{member}'"))
        })?;
        let stub = Stub::new(Some(f));
        let wrapper = stub.clone();
        target.set_member(
            member,
            Arc::new(move |this, args| wrapper.call(this, args)),
        );
        Ok(Self {
            inner: Arc::new(SpyInner {
                stub,
                target,
                member: member.to_string(),
                original,
                restored: AtomicBool::new(false),
            }),
        })
    }

    /// The replaced original binding, directly invocable.
    pub fn original(&self) -> MockFn {
        Arc::clone(&self.inner.original)
    }

    pub fn member(&self) -> &str {
        &self.inner.member
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.stub.calls()
    }

    pub fn call_count(&self) -> usize {
        self.inner.stub.call_count()
    }

    fn restore(&self) {
        if !self.inner.restored.swap(true, Ordering::SeqCst) {
            self.inner
                .target
                .set_member(&self.inner.member, Arc::clone(&self.inner.original));
        }
        self.inner.stub.tear_down();
    }
}

/// Per-run owner of all instrumentation. `settle` invalidates every stub
/// and spy and restores spied bindings; it runs exactly once, when the
/// owning test run completes.
#[derive(Default)]
pub struct MockRegistry {
    stubs: Mutex<Vec<Stub>>,
    spies: Mutex<Vec<Spy>>,
    settled: AtomicBool,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a call-recording stub.
    pub fn stub(&self, target: Option<MockFn>) -> CoreResult<Stub> {
        if self.settled.load(Ordering::SeqCst) {
            return Err(TestError::TornDownMock);
        }
        let stub = Stub::new(target);
        self.stubs.lock().push(stub.clone());
        Ok(stub)
    }

    /// Replace `member` on `target` with a recording wrapper around `f`.
    pub fn spy(&self, target: Arc<dyn MemberTable>, member: &str, f: MockFn) -> CoreResult<Spy> {
        if self.settled.load(Ordering::SeqCst) {
            return Err(TestError::TornDownMock);
        }
        let spy = Spy::install(target, member, f)?;
        self.spies.lock().push(spy.clone());
        Ok(spy)
    }

    /// Tear everything down. Idempotent.
    pub fn settle(&self) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        for stub in self.stubs.lock().iter() {
            stub.tear_down();
        }
        for spy in self.spies.lock().iter() {
            spy.restore();
        }
    }
}

//! Registered test cases and the registration-time registry.

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use stoat_core::case::{CaseMeta, Modifier};
use stoat_core::error::{CoreResult, RegisterError};
use stoat_core::value::Value;

use crate::context::Context;

/// Outcome of a test body or teardown callback.
pub type BodyResult = CoreResult<()>;

/// Boxed async test body: a context plus the case's bound parameters.
pub type TestBody = Arc<dyn Fn(Context, Vec<Value>) -> BoxFuture<'static, BodyResult> + Send + Sync>;

/// A registered unit of test work. Immutable once registered.
pub struct TestCase {
    pub meta: CaseMeta,
    pub(crate) body: Option<TestBody>,
    pub(crate) params: Vec<Value>,
}

impl TestCase {
    /// Register a case with a body. `origin` scopes the name: two cases may
    /// share a name only if they come from different origins.
    pub fn new<F, Fut>(
        origin: impl Into<String>,
        name: impl Into<String>,
        modifier: Modifier,
        body: F,
    ) -> Self
    where
        F: Fn(Context, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        Self {
            meta: CaseMeta::new(origin, name, modifier),
            body: Some(Arc::new(move |ctx, params| Box::pin(body(ctx, params)))),
            params: Vec::new(),
        }
    }

    /// A `todo` placeholder with no body: recorded, never executed.
    pub fn todo(origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            meta: CaseMeta::new(origin, name, Modifier::Todo),
            body: None,
            params: Vec::new(),
        }
    }

    /// Bind trailing parameters passed to the body on execution.
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

/// The set of registered cases for one run. An explicit object handed to
/// the scheduler, scoped to one invocation.
#[derive(Default)]
pub struct TestRegistry {
    cases: Vec<TestCase>,
    names: HashSet<(String, String)>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case. Duplicate names within one origin fail here, at
    /// registration time, never at run time.
    pub fn register(&mut self, case: TestCase) -> Result<(), RegisterError> {
        let key = (case.meta.origin.clone(), case.meta.name.clone());
        if !self.names.insert(key) {
            return Err(RegisterError::DuplicateName {
                origin: case.meta.origin,
                name: case.meta.name,
            });
        }
        self.cases.push(case);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub(crate) fn into_cases(self) -> Vec<TestCase> {
        self.cases
    }
}

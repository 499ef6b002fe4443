// Deferred units of work
//
// Task:    one boxed FnOnce, consumed exactly once by the scheduler.
// Handler: a registered callback that can mint a fresh Task every time it
//          fires (repeating timer waits). Backed by a Clone closure so no
//          reference counting is needed on cores without atomic RMW.

use alloc::boxed::Box;
use core::fmt;

type BoxedFn = Box<dyn FnOnce() + Send + 'static>;

/// A zero-argument callback waiting to run in the cooperative context.
///
/// `Task::default()` is the no-op task.
#[derive(Default)]
pub struct Task {
    handler: Option<BoxedFn>,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            handler: Some(Box::new(f)),
        }
    }

    pub const fn noop() -> Self {
        Self { handler: None }
    }

    pub fn is_noop(&self) -> bool {
        self.handler.is_none()
    }

    pub fn run(self) {
        if let Some(f) = self.handler {
            f();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            f.write_str("Task(noop)")
        } else {
            f.write_str("Task(..)")
        }
    }
}

trait MakeTask: Send {
    fn make_task(&self) -> Task;
}

impl<F> MakeTask for F
where
    F: Fn() + Clone + Send + 'static,
{
    fn make_task(&self) -> Task {
        Task::new(self.clone())
    }
}

/// A callback registered once and invoked many times.
///
/// Each firing posts a new [`Task`] built from a clone of the closure, so
/// captures should be cheap to clone (`&'static` references, small `Copy`
/// values).
pub struct Handler {
    inner: Box<dyn MakeTask>,
}

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Clone + Send + 'static,
    {
        Self { inner: Box::new(f) }
    }

    pub fn task(&self) -> Task {
        self.inner.make_task()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

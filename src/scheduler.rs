//! Continuations and the schedulers that run them.

use futures_executor::ThreadPool;
use std::fmt;
use std::io;
use std::task::Waker;

/// A unit of work to run once a wait completes.
///
/// Continuations built from a [`Waker`] do not allocate, which keeps the
/// read/write path of a pipe allocation-free.
pub struct Continuation(Kind);

enum Kind {
    Wake(Waker),
    Call(Box<dyn FnOnce() + Send + 'static>),
}

impl Continuation {
    /// Create a continuation that runs the given closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Continuation(Kind::Call(Box::new(f)))
    }

    /// Run the continuation, consuming it.
    pub fn run(self) {
        match self.0 {
            Kind::Wake(waker) => waker.wake(),
            Kind::Call(f) => f(),
        }
    }
}

impl From<Waker> for Continuation {
    fn from(waker: Waker) -> Self {
        Continuation(Kind::Wake(waker))
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Kind::Wake(_) => f.write_str("Continuation::Wake"),
            Kind::Call(_) => f.write_str("Continuation::Call"),
        }
    }
}

/// Decides where and when a continuation runs.
pub trait Scheduler: Send + Sync {
    /// Take ownership of a continuation and run it.
    fn schedule(&self, continuation: Continuation);
}

/// Runs continuations immediately on the calling thread.
///
/// Appropriate when continuations only wake tasks, since waking a task just
/// queues it with its executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, continuation: Continuation) {
        continuation.run();
    }
}

/// Runs continuations on a thread pool.
#[derive(Clone, Debug)]
pub struct ThreadPoolScheduler {
    pool: ThreadPool,
}

impl ThreadPoolScheduler {
    /// Create a scheduler backed by a new thread pool with default settings.
    pub fn new() -> io::Result<Self> {
        let pool = ThreadPool::builder()
            .name_prefix("sluicegate-")
            .create()?;

        Ok(Self::from(pool))
    }
}

impl From<ThreadPool> for ThreadPoolScheduler {
    fn from(pool: ThreadPool) -> Self {
        Self {
            pool,
        }
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn schedule(&self, continuation: Continuation) {
        self.pool.spawn_ok(async move {
            continuation.run();
        });
    }
}

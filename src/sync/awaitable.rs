use super::primitives::{hint, thread, AtomicU8, Mutex, Ordering, UnsafeCell};
use super::Completion;
use crate::error::PipeError;
use crate::scheduler::{Continuation, Scheduler};
use std::fmt;
use std::io;
use std::sync::{Arc, PoisonError};

// Slot states. `BUSY` is held only while a continuation is moved into or out
// of the slot by whoever won the transition into it.
const NOT_COMPLETED: u8 = 0;
const COMPLETED: u8 = 1;
const WAITING: u8 = 2;
const BUSY: u8 = 3;

// Cancellation states, independent of the slot.
const NOT_CANCELLED: u8 = 0;
const CANCELLATION_REQUESTED: u8 = 1;
const CANCELLATION_OBSERVED: u8 = 2;

/// A reusable single-slot suspension point.
///
/// One side waits by registering a continuation with
/// [`on_completed`](Awaitable::on_completed), the other side wakes it with
/// [`resume`](Awaitable::resume). After observing completion the waiting side
/// calls [`reset`](Awaitable::reset) to start the next cycle:
///
/// ```text
/// NotCompleted --on_completed--> Waiting --resume--> Completed --reset--> NotCompleted
/// ```
///
/// Continuations are always handed to the scheduler; the awaitable never runs
/// one itself, except when two waiters register at once. That is a protocol
/// violation: the supplied [`Completion`] is faulted and both continuations
/// are run on detached background threads, or on the scheduler if a thread
/// cannot be spawned.
///
/// Cancellation is a separate flag. [`cancel`](Awaitable::cancel) forces the
/// awaitable to complete, and the woken side tells a cancellation apart from a
/// regular wake with [`observe_cancellation`](Awaitable::observe_cancellation).
pub struct Awaitable {
    state: AtomicU8,
    cancelled: AtomicU8,

    /// Holds the continuation while in `WAITING`. Only accessed by whoever
    /// moved the state into `BUSY`.
    continuation: UnsafeCell<Option<Continuation>>,

    scheduler: Arc<dyn Scheduler>,
}

unsafe impl Sync for Awaitable {}

impl Awaitable {
    pub fn new(scheduler: Arc<dyn Scheduler>, completed: bool) -> Self {
        Self {
            state: AtomicU8::new(if completed {
                COMPLETED
            } else {
                NOT_COMPLETED
            }),
            cancelled: AtomicU8::new(NOT_CANCELLED),
            continuation: UnsafeCell::new(None),
            scheduler,
        }
    }

    /// Returns `true` if the awaitable is currently completed.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == COMPLETED
    }

    /// Complete the awaitable, scheduling the waiting continuation if there is
    /// one.
    pub fn resume(&self) {
        loop {
            match self.state.load(Ordering::SeqCst) {
                WAITING => {
                    if self.lock(WAITING) {
                        let continuation = self.take_continuation();
                        self.state.store(COMPLETED, Ordering::SeqCst);

                        if let Some(continuation) = continuation {
                            tracing::trace!("resuming waiting continuation");
                            self.scheduler.schedule(continuation);
                        }

                        return;
                    }
                }

                BUSY => hint::spin_loop(),

                current => {
                    if self.transition(current, COMPLETED) {
                        return;
                    }
                }
            }
        }
    }

    /// Return a completed awaitable to the not completed state.
    ///
    /// Has no effect unless currently completed. An observed cancellation is
    /// cleared; a cancellation requested but not yet observed completes the
    /// awaitable again so it is not lost.
    pub fn reset(&self) {
        self.transition(COMPLETED, NOT_COMPLETED);

        let cancelled = self.cancelled.compare_exchange(
            CANCELLATION_OBSERVED,
            NOT_CANCELLED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if cancelled == Err(CANCELLATION_REQUESTED) {
            self.resume();
        }
    }

    /// Register a continuation to run on the next resume.
    ///
    /// If already completed the continuation is scheduled immediately. If
    /// another continuation is already waiting, `completion` is faulted with
    /// [`PipeError::NoConcurrentOperation`] and both continuations are
    /// dispatched in the background.
    pub fn on_completed(&self, continuation: Continuation, completion: &Completion) {
        loop {
            match self.state.load(Ordering::SeqCst) {
                NOT_COMPLETED => {
                    if self.lock(NOT_COMPLETED) {
                        self.continuation.with_mut(|slot| unsafe {
                            *slot = Some(continuation);
                        });
                        self.state.store(WAITING, Ordering::SeqCst);
                        return;
                    }
                }

                COMPLETED => {
                    self.scheduler.schedule(continuation);
                    return;
                }

                WAITING => {
                    if self.lock(WAITING) {
                        completion.try_complete(Some(PipeError::NoConcurrentOperation));

                        let existing = self.take_continuation();
                        self.state.store(COMPLETED, Ordering::SeqCst);

                        tracing::warn!("concurrent wait detected, faulting pipe");

                        self.dispatch_detached(continuation);
                        if let Some(existing) = existing {
                            self.dispatch_detached(existing);
                        }

                        return;
                    }
                }

                _ => hint::spin_loop(),
            }
        }
    }

    /// Request cancellation and wake any waiter.
    pub fn cancel(&self) {
        self.cancelled.store(CANCELLATION_REQUESTED, Ordering::SeqCst);
        self.resume();
    }

    /// Consume a pending cancellation request.
    ///
    /// Returns `true` only for the first call after a cancellation was
    /// requested.
    pub fn observe_cancellation(&self) -> bool {
        self.cancelled
            .compare_exchange(
                CANCELLATION_REQUESTED,
                CANCELLATION_OBSERVED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    #[inline]
    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[inline]
    fn lock(&self, from: u8) -> bool {
        self.transition(from, BUSY)
    }

    /// Must only be called while holding `BUSY`.
    fn take_continuation(&self) -> Option<Continuation> {
        self.continuation.with_mut(|slot| unsafe { (*slot).take() })
    }

    fn dispatch_detached(&self, continuation: Continuation) {
        dispatch_detached(continuation, &*self.scheduler, spawn_thread);
    }
}

impl fmt::Debug for Awaitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::SeqCst) {
            NOT_COMPLETED => "NotCompleted",
            COMPLETED => "Completed",
            WAITING => "Waiting",
            _ => "Busy",
        };

        let cancelled = match self.cancelled.load(Ordering::SeqCst) {
            NOT_CANCELLED => "NotCancelled",
            CANCELLATION_REQUESTED => "CancellationRequested",
            _ => "CancellationObserved",
        };

        f.debug_struct("Awaitable")
            .field("state", &state)
            .field("cancelled", &cancelled)
            .finish()
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

fn spawn_thread(job: Job) -> io::Result<()> {
    thread::Builder::new()
        .name(String::from("sluicegate-fault"))
        .spawn(job)
        .map(drop)
}

/// Run a continuation on its own detached thread, independent of both the
/// caller and the scheduler.
///
/// The continuation stays reachable from here until the spawned thread takes
/// it, so if `spawn` fails it is handed to `scheduler` instead of being lost.
fn dispatch_detached<F>(continuation: Continuation, scheduler: &dyn Scheduler, spawn: F)
where
    F: FnOnce(Job) -> io::Result<()>,
{
    let slot = Arc::new(Mutex::new(Some(continuation)));

    let job = {
        let slot = slot.clone();
        Box::new(move || {
            if let Some(continuation) = take(&slot) {
                continuation.run();
            }
        })
    };

    if let Err(e) = spawn(job) {
        tracing::error!(error = %e, "failed to spawn thread for faulted continuation, using scheduler");

        if let Some(continuation) = take(&slot) {
            scheduler.schedule(continuation);
        }
    }
}

fn take(slot: &Mutex<Option<Continuation>>) -> Option<Continuation> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use crate::scheduler::InlineScheduler;
    use loom::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Continuation) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = count.clone();
            move || {
                let count = count.clone();
                Continuation::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };

        (count, make)
    }

    #[test]
    fn resume_and_wait_never_lose_wakeup() {
        loom::model(|| {
            let awaitable = Arc::new(Awaitable::new(Arc::new(InlineScheduler), false));
            let completion = Completion::new();
            let (count, continuation) = counter();

            let resumer = {
                let awaitable = awaitable.clone();
                thread::spawn(move || awaitable.resume())
            };

            awaitable.on_completed(continuation(), &completion);
            resumer.join().unwrap();

            assert_eq!(count.load(Ordering::SeqCst), 1);
            assert!(awaitable.is_completed());
            assert!(!completion.is_completed());
        });
    }

    #[test]
    fn cancel_and_reset_never_lose_cancellation() {
        loom::model(|| {
            let awaitable = Arc::new(Awaitable::new(Arc::new(InlineScheduler), true));

            let canceller = {
                let awaitable = awaitable.clone();
                thread::spawn(move || awaitable.cancel())
            };

            awaitable.reset();
            canceller.join().unwrap();

            assert!(awaitable.is_completed());
            assert!(awaitable.observe_cancellation());
        });
    }

    #[test]
    fn double_subscribe_dispatches_both() {
        let mut builder = loom::model::Builder::new();
        builder.preemption_bound = Some(3);

        builder.check(|| {
            let awaitable = Arc::new(Awaitable::new(Arc::new(InlineScheduler), false));
            let completion = Arc::new(Completion::new());
            let (count, continuation) = counter();

            let subscriber = {
                let awaitable = awaitable.clone();
                let completion = completion.clone();
                let continuation = continuation();
                thread::spawn(move || awaitable.on_completed(continuation, &completion))
            };

            awaitable.on_completed(continuation(), &completion);
            subscriber.join().unwrap();

            assert!(awaitable.is_completed());
            assert!(matches!(completion.check(), Err(PipeError::NoConcurrentOperation)));

            while count.load(Ordering::SeqCst) < 2 {
                thread::yield_now();
            }
            assert_eq!(count.load(Ordering::SeqCst), 2);
        });
    }
}

use super::primitives::{hint, thread, AtomicU8, Ordering, UnsafeCell};
use crate::error::{PipeError, Result};
use std::fmt;

const UNSET: u8 = 0;
const COMPLETING: u8 = 1;
const COMPLETED: u8 = 2;

/// Spins to wait out a racing `try_complete` before yielding the thread.
const SPIN_LIMIT: u32 = 64;

/// Terminal marker for one end of a pipe.
///
/// A completion is set at most once, optionally carrying a fault. The first
/// call to [`try_complete`](Completion::try_complete) wins and every later call
/// is ignored. Once set, [`check`](Completion::check) hands back the recorded
/// fault as many times as it is asked.
pub struct Completion {
    state: AtomicU8,

    /// Written only by the winner of the `UNSET -> COMPLETING` transition, and
    /// read only after observing `COMPLETED`.
    fault: UnsafeCell<Option<PipeError>>,
}

unsafe impl Sync for Completion {}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(UNSET),
            fault: UnsafeCell::new(None),
        }
    }

    /// Mark as completed, recording an optional fault.
    ///
    /// Returns `true` if this call completed it, or `false` if it had already
    /// been completed, in which case `fault` is discarded.
    pub fn try_complete(&self, fault: Option<PipeError>) -> bool {
        if self
            .state
            .compare_exchange(UNSET, COMPLETING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        self.fault.with_mut(|slot| unsafe {
            *slot = fault;
        });

        self.state.store(COMPLETED, Ordering::SeqCst);
        true
    }

    /// Returns `true` once any call to `try_complete` has won.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::SeqCst) != UNSET
    }

    /// Return the recorded fault, if any.
    ///
    /// Succeeds if not yet completed or if completed without a fault.
    ///
    /// A `try_complete` racing with this call may already report
    /// `is_completed` while it is still storing its fault. `check` waits out
    /// that window, which spans one store by the winning thread; it spins
    /// briefly and then yields rather than taking a lock.
    pub fn check(&self) -> Result<()> {
        let mut spins = 0;

        loop {
            match self.state.load(Ordering::SeqCst) {
                UNSET => return Ok(()),

                COMPLETING if spins < SPIN_LIMIT => {
                    spins += 1;
                    hint::spin_loop();
                }

                COMPLETING => thread::yield_now(),

                _ => {
                    return self.fault.with(|slot| match unsafe { &*slot } {
                        Some(fault) => Err(fault.clone()),
                        None => Ok(()),
                    });
                }
            }
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .field("faulted", &self.check().is_err())
            .finish()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;

    #[test]
    fn check_never_sees_partial_fault() {
        loom::model(|| {
            let completion = Arc::new(Completion::new());

            let writer = {
                let completion = completion.clone();
                loom::thread::spawn(move || {
                    completion.try_complete(Some(PipeError::NoConcurrentOperation))
                })
            };

            match completion.check() {
                Ok(()) | Err(PipeError::NoConcurrentOperation) => {}
                Err(e) => panic!("unexpected fault: {}", e),
            }

            assert!(writer.join().unwrap());
            assert!(matches!(
                completion.check(),
                Err(PipeError::NoConcurrentOperation)
            ));
        });
    }

    #[test]
    fn racing_completions_have_one_winner() {
        loom::model(|| {
            let completion = Arc::new(Completion::new());

            let other = {
                let completion = completion.clone();
                loom::thread::spawn(move || completion.try_complete(Some(PipeError::Cancelled)))
            };

            let won = completion.try_complete(None);
            let other_won = other.join().unwrap();

            assert!(won != other_won);
            assert_eq!(completion.check().is_err(), other_won);
        });
    }
}

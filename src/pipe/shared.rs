//! State shared between the two ends of a pipe.

use crate::scheduler::{Continuation, Scheduler};
use crate::sync::{Awaitable, Completion};
use futures_util::task::{waker, ArcWake, AtomicWaker};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

#[derive(Debug)]
pub(crate) struct Shared {
    /// Bytes written but not yet read.
    buffer: Mutex<VecDeque<u8>>,

    /// Writes are suspended once this many bytes are buffered.
    pause_threshold: usize,

    /// Suspended writes are resumed once buffered bytes drop to this many.
    resume_threshold: usize,

    /// Completed when there may be data for the reader.
    pub(crate) reader_awaitable: Awaitable,

    /// Completed when there may be space for the writer.
    pub(crate) writer_awaitable: Awaitable,

    pub(crate) reader_completion: Completion,
    pub(crate) writer_completion: Completion,
}

impl Shared {
    pub(crate) fn new(
        pause_threshold: usize,
        resume_threshold: usize,
        reader_scheduler: Arc<dyn Scheduler>,
        writer_scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            pause_threshold,
            resume_threshold,
            reader_awaitable: Awaitable::new(reader_scheduler, false),
            writer_awaitable: Awaitable::new(writer_scheduler, true),
            reader_completion: Completion::new(),
            writer_completion: Completion::new(),
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<u8>> {
        // The buffer holds plain bytes, so a panic elsewhere cannot leave it
        // in an inconsistent state.
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move as many buffered bytes as fit into `dest`, resuming the writer if
    /// enough space has been freed.
    pub(crate) fn read_into(&self, dest: &mut [u8]) -> usize {
        let (len, remaining) = {
            let mut buffer = self.lock_buffer();
            let len = dest.len().min(buffer.len());

            for (dest, byte) in dest.iter_mut().zip(buffer.drain(..len)) {
                *dest = byte;
            }

            (len, buffer.len())
        };

        if len > 0 && remaining <= self.resume_threshold {
            self.writer_awaitable.resume();
        }

        len
    }

    /// Buffer as many bytes from `src` as there is room for, resuming the
    /// reader if any were written.
    pub(crate) fn write_from(&self, src: &[u8]) -> usize {
        let len = {
            let mut buffer = self.lock_buffer();
            let len = src
                .len()
                .min(self.pause_threshold.saturating_sub(buffer.len()));

            buffer.extend(&src[..len]);
            len
        };

        if len > 0 {
            self.reader_awaitable.resume();
        }

        len
    }

    pub(crate) fn buffered(&self) -> usize {
        self.lock_buffer().len()
    }
}

/// Wakes whichever task most recently waited on one end of a pipe.
#[derive(Debug, Default)]
struct WakeSlot(AtomicWaker);

impl ArcWake for WakeSlot {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.wake();
    }
}

/// Per-endpoint bookkeeping for waiting on an [`Awaitable`].
///
/// The awaitable holds a waker for a shared slot rather than the task's own
/// waker, so a pending operation polled again with a different waker only
/// updates the slot and never subscribes a second time.
#[derive(Debug, Default)]
pub(crate) struct Waiter {
    slot: Arc<WakeSlot>,

    /// Set while our continuation may be installed in the awaitable. Cleared
    /// only when the awaitable is seen completed, which means the
    /// continuation has been taken.
    pending: bool,
}

impl Waiter {
    /// Wait for the awaitable to complete.
    ///
    /// Returns `Ready` once the awaitable has been completed and reset; the
    /// caller should then check its condition again.
    pub(crate) fn poll_wait(
        &mut self,
        cx: &mut Context<'_>,
        awaitable: &Awaitable,
        faults: &Completion,
    ) -> Poll<()> {
        // Register first so a resume racing with the check below wakes the
        // current task rather than a stale waker.
        self.slot.0.register(cx.waker());

        if awaitable.is_completed() {
            self.pending = false;
            awaitable.reset();
            return Poll::Ready(());
        }

        if !self.pending {
            self.pending = true;
            awaitable.on_completed(Continuation::from(waker(self.slot.clone())), faults);
        }

        Poll::Pending
    }
}

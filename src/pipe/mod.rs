//! Asynchronous in-memory byte pipes with backpressure.
//!
//! Pipes are like byte-oriented channels that implement I/O traits for reading
//! and writing. The writer is suspended once the pipe holds a configurable
//! number of bytes, and resumed once the reader has drained enough of them.

use crate::error::PipeError;
use crate::scheduler::{InlineScheduler, Scheduler};
use futures_io::{AsyncRead, AsyncWrite};
use futures_util::ready;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

mod shared;

use self::shared::{Shared, Waiter};

const DEFAULT_PAUSE_WRITER_THRESHOLD: usize = 65536;
const DEFAULT_RESUME_WRITER_THRESHOLD: usize = 32768;

/// Creates a new asynchronous pipe with the default configuration.
pub fn pipe() -> (PipeReader, PipeWriter) {
    PipeBuilder::default().build()
}

/// Creates new pipes with configurable properties.
#[derive(Clone)]
pub struct PipeBuilder {
    pause_writer_threshold: usize,
    resume_writer_threshold: usize,
    reader_scheduler: Arc<dyn Scheduler>,
    writer_scheduler: Arc<dyn Scheduler>,
}

impl Default for PipeBuilder {
    fn default() -> Self {
        Self {
            pause_writer_threshold: DEFAULT_PAUSE_WRITER_THRESHOLD,
            resume_writer_threshold: DEFAULT_RESUME_WRITER_THRESHOLD,
            reader_scheduler: Arc::new(InlineScheduler),
            writer_scheduler: Arc::new(InlineScheduler),
        }
    }
}

impl PipeBuilder {
    /// Set how many bytes may be buffered before writes are suspended.
    ///
    /// Values below one are treated as one.
    pub fn pause_writer_threshold(&mut self, bytes: usize) -> &mut Self {
        self.pause_writer_threshold = bytes;
        self
    }

    /// Set how few bytes must remain buffered before a suspended write is
    /// resumed.
    ///
    /// Values above the pause threshold are treated as the pause threshold.
    pub fn resume_writer_threshold(&mut self, bytes: usize) -> &mut Self {
        self.resume_writer_threshold = bytes;
        self
    }

    /// Set the scheduler used to wake a suspended reader.
    pub fn reader_scheduler(&mut self, scheduler: Arc<dyn Scheduler>) -> &mut Self {
        self.reader_scheduler = scheduler;
        self
    }

    /// Set the scheduler used to wake a suspended writer.
    pub fn writer_scheduler(&mut self, scheduler: Arc<dyn Scheduler>) -> &mut Self {
        self.writer_scheduler = scheduler;
        self
    }

    /// Create a new pipe using the current settings and return a reader and
    /// writer pair.
    pub fn build(&self) -> (PipeReader, PipeWriter) {
        let pause = self.pause_writer_threshold.max(1);
        let resume = self.resume_writer_threshold.min(pause);

        let shared = Arc::new(Shared::new(
            pause,
            resume,
            self.reader_scheduler.clone(),
            self.writer_scheduler.clone(),
        ));

        (
            PipeReader {
                shared: shared.clone(),
                waiter: Waiter::default(),
            },
            PipeWriter {
                shared,
                waiter: Waiter::default(),
            },
        )
    }
}

impl fmt::Debug for PipeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeBuilder")
            .field("pause_writer_threshold", &self.pause_writer_threshold)
            .field("resume_writer_threshold", &self.resume_writer_threshold)
            .finish()
    }
}

/// The reading end of an asynchronous pipe.
///
/// Reads return zero once the writer has completed and all buffered bytes have
/// been read. If the writer completed with a fault, reads fail with it.
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
    waiter: Waiter,
}

impl PipeReader {
    /// Get a handle that can cancel a pending read from another task.
    pub fn canceller(&self) -> ReadCanceller {
        ReadCanceller {
            shared: self.shared.clone(),
        }
    }

    /// Get the number of bytes currently buffered in the pipe.
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }

    /// Stop reading, optionally recording a fault for the writer to see.
    pub fn complete(self, fault: Option<PipeError>) {
        self.finish(fault);
    }

    fn finish(&self, fault: Option<PipeError>) {
        if self.shared.reader_completion.try_complete(fault) {
            tracing::trace!("pipe reader completed");
            self.shared.writer_awaitable.resume();
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let shared = &*this.shared;

        loop {
            if shared.reader_awaitable.observe_cancellation() {
                return Poll::Ready(Err(PipeError::Cancelled.into()));
            }

            if let Err(e) = shared.writer_completion.check() {
                return Poll::Ready(Err(e.into()));
            }

            // Checked before reading so that bytes written just before the
            // writer completed are not mistaken for end of stream.
            let writer_completed = shared.writer_completion.is_completed();

            let len = shared.read_into(buf);

            if len > 0 || buf.is_empty() {
                return Poll::Ready(Ok(len));
            }

            if writer_completed {
                return Poll::Ready(Ok(0));
            }

            ready!(this
                .waiter
                .poll_wait(cx, &shared.reader_awaitable, &shared.writer_completion));
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.finish(None);
    }
}

/// The writing end of an asynchronous pipe.
///
/// Writes accept as many bytes as fit below the pause threshold and wait when
/// the pipe is full. Writes fail with `BrokenPipe` once the reader has
/// completed, or with the reader's fault if it recorded one.
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
    waiter: Waiter,
}

impl PipeWriter {
    /// Get a handle that can cancel a pending write from another task.
    pub fn canceller(&self) -> WriteCanceller {
        WriteCanceller {
            shared: self.shared.clone(),
        }
    }

    /// Check if the reading end of the pipe has been completed.
    pub fn is_closed(&self) -> bool {
        self.shared.reader_completion.is_completed()
    }

    /// Get the number of bytes currently buffered in the pipe.
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }

    /// Stop writing, optionally recording a fault for the reader to see.
    pub fn complete(self, fault: Option<PipeError>) {
        self.finish(fault);
    }

    fn finish(&self, fault: Option<PipeError>) {
        if self.shared.writer_completion.try_complete(fault) {
            tracing::trace!("pipe writer completed");
            self.shared.reader_awaitable.resume();
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let shared = &*this.shared;

        loop {
            if shared.writer_awaitable.observe_cancellation() {
                return Poll::Ready(Err(PipeError::Cancelled.into()));
            }

            if let Err(e) = shared.reader_completion.check() {
                return Poll::Ready(Err(e.into()));
            }

            if shared.reader_completion.is_completed() {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }

            if let Err(e) = shared.writer_completion.check() {
                return Poll::Ready(Err(e.into()));
            }

            if shared.writer_completion.is_completed() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write after pipe writer was closed",
                )));
            }

            let len = shared.write_from(buf);

            if len > 0 || buf.is_empty() {
                return Poll::Ready(Ok(len));
            }

            ready!(this
                .waiter
                .poll_wait(cx, &shared.writer_awaitable, &shared.reader_completion));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.finish(None);
        Poll::Ready(Ok(()))
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.finish(None);
    }
}

/// Cancels the pending or next read on a pipe.
///
/// The cancelled read fails with [`PipeError::Cancelled`]; the reader remains
/// usable afterwards.
#[derive(Clone, Debug)]
pub struct ReadCanceller {
    shared: Arc<Shared>,
}

impl ReadCanceller {
    pub fn cancel(&self) {
        self.shared.reader_awaitable.cancel();
    }
}

/// Cancels the pending or next write on a pipe.
///
/// The cancelled write fails with [`PipeError::Cancelled`]; the writer remains
/// usable afterwards.
#[derive(Clone, Debug)]
pub struct WriteCanceller {
    shared: Arc<Shared>,
}

impl WriteCanceller {
    pub fn cancel(&self) {
        self.shared.writer_awaitable.cancel();
    }
}

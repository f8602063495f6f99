//! Flow-controlled asynchronous byte pipes built on lock-free awaitables.
//!
//! The [`sync`] module contains the building blocks: a write-once
//! [`Completion`](sync::Completion) and a single-slot
//! [`Awaitable`](sync::Awaitable) that suspends one side of a pipe until the
//! other side resumes it. The [`pipe`] module composes them into an
//! in-memory pipe with backpressure.

pub mod error;
pub mod pipe;
pub mod scheduler;
pub mod sync;

pub use crate::error::{PipeError, Result};
pub use crate::pipe::{pipe, PipeBuilder, PipeReader, PipeWriter};
pub use crate::scheduler::{Continuation, InlineScheduler, Scheduler, ThreadPoolScheduler};

//! Lock-free primitives for suspending and resuming the two ends of a pipe.
//!
//! A pipe uses one [`Awaitable`] per direction: the reader waits on one for
//! data, the writer waits on the other for space. Each end also has a
//! [`Completion`] recording whether it has finished and whether it failed.

mod awaitable;
mod completion;
mod primitives;

pub use self::awaitable::Awaitable;
pub use self::completion::Completion;

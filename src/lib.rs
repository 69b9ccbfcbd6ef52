//! Settle-once promises with `then` chaining for single-threaded event loops.
//!
//! A [`Promise`] starts pending and is settled exactly once, either fulfilled
//! with a value or rejected with a reason. Any number of handlers can be
//! attached before or after that happens. Settlement is always deferred to a
//! later turn of the promise's scheduler, so a handler never observes a
//! settlement in the same turn that caused it.
//!
//! # Examples
//!
//! ```
//! use thenable::{EventLoop, Promise};
//!
//! let answer = Promise::<i32, String>::resolve(5)
//!     .and_then(|v| Ok(v * 2))
//!     .and_then(|v| Ok(v + 1));
//! assert!(answer.is_pending());
//!
//! EventLoop::current().run().unwrap();
//! assert_eq!(answer.outcome(), Some(Ok(11)));
//! ```
use thiserror::Error;

mod combinators;
pub mod event_loop;
mod promise;
mod resolution;
mod settled;

pub use event_loop::{Config, EventLoop, Handle, Schedule, Task};
pub use promise::{Promise, PromiseState, Settle};
pub use resolution::{IntoResolution, Resolution, Thenable};
pub use settled::Settled;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every settlement capability of a pending promise was dropped, so it
    /// can never settle.
    #[error("promise abandoned: every settlement capability was dropped while pending")]
    Abandoned,
    #[error("event loop is already running")]
    Reentrant,
    #[error("event loop still had work after {0} tasks")]
    TurnLimit(usize),
}

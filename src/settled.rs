//! Awaiting a promise from async Rust.
use crate::{promise::Shared, Error};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

/// Completes with the outcome of a promise once it settles, or with
/// [`Error::Abandoned`] if it never can.
///
/// Polling does not drive the promise's scheduler; something else has to
/// run the event loop for the outcome to arrive.
///
/// # Examples
///
/// ```
/// use futures::executor::block_on;
/// use thenable::{EventLoop, Promise};
///
/// let promise = Promise::<i32, String>::reject("💥".into());
/// EventLoop::current().run().unwrap();
/// assert_eq!(block_on(promise.settled()), Ok(Err("💥".to_string())));
/// ```
pub struct Settled<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Settled<T, E> {
    pub(crate) fn new(shared: Rc<Shared<T, E>>) -> Self {
        Settled { shared }
    }
}

impl<T: Clone, E: Clone> Future for Settled<T, E> {
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_outcome(cx.waker())
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, EventLoop, Promise};
    use futures::{executor::block_on, FutureExt};

    #[test]
    fn test_settled_is_pending_until_the_loop_runs() {
        let promise = Promise::<i32, String>::resolve(5);
        let mut settled = promise.settled();
        assert_eq!((&mut settled).now_or_never(), None);
        EventLoop::current().run().unwrap();
        assert_eq!(settled.now_or_never(), Some(Ok(Ok(5))));
    }

    #[test]
    fn test_await_a_promise() {
        let promise = Promise::<&str, String>::resolve("🍓").and_then(|v| Ok(v.len()));
        EventLoop::current().run().unwrap();
        let received = block_on(async { promise.await });
        assert_eq!(received, Ok(Ok(4)));
    }

    #[test]
    fn test_abandoned_promise_reports_error() {
        let (promise, resolve, reject) = Promise::<i32, String>::with_resolvers();
        let mut settled = promise.settled();
        assert_eq!((&mut settled).now_or_never(), None);
        drop((resolve, reject));
        assert_eq!(block_on(settled), Err(Error::Abandoned));
    }
}

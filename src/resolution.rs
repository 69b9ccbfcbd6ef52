//! What a handler hands back, and how a promise adopts it.
use crate::{event_loop::Handle, promise::Settle, Promise};
use std::fmt;

/// Anything that can report an eventual outcome to a pair of callbacks.
///
/// [`Promise`] is the obvious implementor, but foreign future-like values can
/// take part in chaining by implementing this too. An implementation should
/// call at most one of the callbacks, at most once. Promises that adopt a
/// thenable tolerate misbehaving ones because their own settlement is
/// first-writer-wins.
pub trait Thenable<T, E> {
    fn subscribe(self: Box<Self>, on_fulfilled: Settle<T>, on_rejected: Settle<E>);
}

/// The outcome a handler produces for the promise returned by `then`.
pub enum Resolution<T, E> {
    Fulfill(T),
    Reject(E),
    /// Take on the eventual outcome of another thenable.
    Adopt(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn adopt<P>(thenable: P) -> Self
    where
        P: Thenable<T, E> + 'static,
    {
        Resolution::Adopt(Box::new(thenable))
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Fulfill(value) => f.debug_tuple("Fulfill").field(value).finish(),
            Resolution::Reject(reason) => f.debug_tuple("Reject").field(reason).finish(),
            Resolution::Adopt(_) => f.write_str("Adopt(..)"),
        }
    }
}

/// Conversion into a [`Resolution`].
///
/// Handlers passed to [`Promise::then`] and friends may return a
/// `Result<T, E>` (`Err` is a raised failure), a [`Promise`], a boxed
/// [`Thenable`], or a [`Resolution`] directly.
pub trait IntoResolution<T, E> {
    fn into_resolution(self) -> Resolution<T, E>;

    /// A promise on `scheduler` settling the way this resolution does.
    fn into_promise(self, scheduler: Handle) -> Promise<T, E>
    where
        Self: Sized,
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let resolution = self.into_resolution();
        Promise::new_in(scheduler, move |resolve, reject| {
            settle(resolution, resolve, reject)
        })
    }
}

impl<T, E> IntoResolution<T, E> for Resolution<T, E> {
    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

impl<T, E> IntoResolution<T, E> for Result<T, E> {
    fn into_resolution(self) -> Resolution<T, E> {
        match self {
            Ok(value) => Resolution::Fulfill(value),
            Err(reason) => Resolution::Reject(reason),
        }
    }
}

impl<T, E> IntoResolution<T, E> for Box<dyn Thenable<T, E>> {
    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Adopt(self)
    }
}

/// Route `resolution` into a pair of settlement capabilities.
pub(crate) fn settle<T, E>(resolution: Resolution<T, E>, resolve: Settle<T>, reject: Settle<E>) {
    match resolution {
        Resolution::Fulfill(value) => resolve(value),
        Resolution::Reject(reason) => reject(reason),
        Resolution::Adopt(thenable) => thenable.subscribe(resolve, reject),
    }
}

//! Promises backed by an executor thread, consumed through `then`/`catch`
//! continuations that chain into new promises.
//!
//! ```
//! use thenable::{Promise, Promiseable};
//! use std::sync::mpsc::channel;
//!
//! let (tx, rx) = channel();
//! let promise = Promise::new(|resolve, _reject| {
//!     resolve.resolve(42);
//! });
//! promise.then(move |value| {
//!     tx.send(value).ok();
//!     Ok(())
//! });
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```
use std::sync::Arc;

pub mod executor;
pub mod promise;
pub mod settled;

pub use executor::{Builder, Reject, Resolve};
pub use promise::Promise;
pub use settled::Settled;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cause(Arc<dyn std::error::Error + Send + Sync + 'static>),
    #[error("{0}")]
    Message(Arc<str>),
    #[error("executor dropped its callbacks without settling the promise")]
    ExecutorDropped,
    #[error("executor panicked: {0}")]
    ExecutorPanicked(Arc<str>),
    #[error("continuation panicked: {0}")]
    ContinuationPanicked(Arc<str>),
    #[error("failed to spawn executor thread: {0}")]
    Spawn(Arc<std::io::Error>),
}

impl Error {
    /// Wraps an arbitrary error as an opaque rejection cause.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Cause(Arc::new(err))
    }

    pub fn msg(message: impl Into<Arc<str>>) -> Self {
        Error::Message(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Spawn(Arc::new(err))
    }
}

/// Anything that accepts success and failure continuations.
///
/// Each registration returns the child promise that carries the
/// continuation's own outcome: `Ok(())` resolves the child with `()`, `Err`
/// rejects it. Values are not forwarded down the chain.
pub trait Promiseable<T> {
    fn then<F>(&self, on_resolved: F) -> Promise<()>
    where
        F: FnOnce(T) -> Result<(), Error> + Send + 'static;

    fn catch<F>(&self, on_rejected: F) -> Promise<()>
    where
        F: FnOnce(Error) -> Result<(), Error> + Send + 'static;
}

//! The callbacks handed to a promise's executor, and the thread that runs it.
//!
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::{Error, Promise};

const DEFAULT_THREAD_NAME: &str = "promise-executor";

/// Resolve-callback given to an executor. Clones may be sent to other
/// threads; whichever of them settles first wins.
pub struct Resolve<T: Clone + Send + 'static> {
    settler: Arc<Settler<T>>,
}

/// Reject-callback given to an executor.
pub struct Reject<T: Clone + Send + 'static> {
    settler: Arc<Settler<T>>,
}

/// Shared by every `Resolve`/`Reject` clone of one promise.
struct Settler<T: Clone + Send + 'static> {
    promise: Promise<T>,
}

impl<T: Clone + Send + 'static> Resolve<T> {
    /// Returns `true` if this call settled the promise.
    pub fn resolve(&self, value: T) -> bool {
        self.settler.promise.resolve(value)
    }
}

impl<T: Clone + Send + 'static> Reject<T> {
    /// Returns `true` if this call settled the promise.
    pub fn reject(&self, err: Error) -> bool {
        self.settler.promise.reject(err)
    }
}

impl<T: Clone + Send + 'static> Clone for Resolve<T> {
    fn clone(&self) -> Self {
        Self {
            settler: self.settler.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for Reject<T> {
    fn clone(&self) -> Self {
        Self {
            settler: self.settler.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Resolve<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resolve").field(&self.settler.promise).finish()
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Reject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reject").field(&self.settler.promise).finish()
    }
}

impl<T: Clone + Send + 'static> Drop for Settler<T> {
    /// If the promise is still pending once no callback can reach it, reject.
    fn drop(&mut self) {
        if self.promise.reject(Error::ExecutorDropped) {
            debug!("executor dropped its callbacks while pending");
        }
    }
}

/// Executor thread configuration, mirroring `std::thread::Builder`.
///
/// # Examples
///
/// ```
/// use thenable::{Builder, Promise};
/// use futures::executor::block_on;
///
/// let promise: Promise<String> = Builder::new()
///     .name("fetch")
///     .stack_size(256 * 1024)
///     .spawn(|resolve, _reject| {
///         resolve.resolve(std::thread::current().name().unwrap().to_string());
///     })
///     .expect("spawn failed");
/// assert_eq!(block_on(promise.settled()).unwrap(), "fetch");
/// ```
#[derive(Debug, Default, Clone)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Spawns `executor` on a new thread and returns the promise it settles.
    ///
    /// A panicking executor rejects the promise with
    /// [`Error::ExecutorPanicked`]. Dropping every callback without settling
    /// rejects it with [`Error::ExecutorDropped`].
    ///
    /// Fails with [`Error::Spawn`] if the thread cannot be created, including
    /// when the configured name contains a NUL byte.
    pub fn spawn<T, F>(self, executor: F) -> Result<Promise<T>, Error>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolve<T>, Reject<T>) + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| DEFAULT_THREAD_NAME.into());
        if name.contains('\0') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "executor thread name contains a NUL byte",
            )
            .into());
        }
        let promise = Promise::pending();
        // Held by the thread itself so a panic is reported before the
        // settler can observe the callbacks being dropped.
        let settler = Arc::new(Settler {
            promise: promise.clone(),
        });
        let resolve = Resolve {
            settler: settler.clone(),
        };
        let reject = Reject {
            settler: settler.clone(),
        };

        let mut thread = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            thread = thread.stack_size(size);
        }
        thread.spawn(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| executor(resolve, reject)))
            {
                let message = panic_message(&*payload);
                warn!(%message, "promise executor panicked");
                settler
                    .promise
                    .reject(Error::ExecutorPanicked(message.into()));
            }
        })?;
        Ok(promise)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::{Error, Promise};

/// Completes with the outcome of a promise once it settles.
///
/// Any number of `Settled` futures may wait on the same promise; each
/// receives its own clone of the outcome. Dropping a pending `Settled`
/// removes its waker from the promise.
///
/// # Examples
///
/// ```
/// use thenable::{Error, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let promise = Promise::<()>::new(|_resolve, reject| {
///     reject.reject(Error::msg("💥"));
/// });
/// let other = promise.settled();
/// let task = thread::spawn(move || block_on(other).unwrap_err().to_string());
/// assert_eq!(block_on(promise.settled()).unwrap_err().to_string(), "💥");
/// assert_eq!(task.join().expect("The task thread has panicked"), "💥");
/// ```
pub struct Settled<T> {
    promise: Promise<T>,
    /// Slot of this future's waker in the promise's waker list.
    key: Option<usize>,
}

impl<T> Settled<T> {
    pub(crate) fn new(promise: Promise<T>) -> Self {
        Self { promise, key: None }
    }
}

impl<T> Drop for Settled<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.promise.lock().wakers.retain(|(k, _)| *k != key);
        }
    }
}

impl<T> fmt::Debug for Settled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Settled").field(&self.promise).finish()
    }
}

impl<T: Clone> Future for Settled<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut guard = this.promise.lock();
        let promise = &mut *guard;
        if let Some(ref outcome) = promise.outcome {
            this.key = None;
            return Poll::Ready(outcome.clone());
        }
        let slot = this
            .key
            .and_then(|key| promise.wakers.iter_mut().find(|(k, _)| *k == key));
        match slot {
            Some((_, waker)) => {
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => {
                let key = promise.next_waker;
                promise.next_waker += 1;
                promise.wakers.push((key, cx.waker().clone()));
                this.key = Some(key);
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    #[allow(unused_imports)]
    use futures::executor::block_on;
    use futures::task::noop_waker;
    use super::Settled;
    use crate::{Error, Promise};
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::thread;

    #[test]
    fn test_settled_resolve() {
        let promise = Promise::new(|resolve, _reject| {
            resolve.resolve(String::from("🍓"));
        });
        assert_eq!(block_on(promise.settled()).unwrap(), "🍓");
    }

    #[test]
    fn test_settled_reject() {
        let promise = Promise::<String>::new(|_resolve, reject| {
            reject.reject(Error::msg("reject!!"));
        });
        assert_eq!(
            block_on(promise.settled()).unwrap_err().to_string(),
            "reject!!"
        );
    }

    #[test]
    fn test_two_settled_futures() {
        let promise = Promise::<i32>::pending();
        let (a, b) = (promise.settled(), promise.settled());
        let task1 = thread::spawn(move || block_on(a));
        let task2 = thread::spawn(move || block_on(b));
        promise.resolve(3);
        assert_eq!(task1.join().expect("The task1 thread has panicked").unwrap(), 3);
        assert_eq!(task2.join().expect("The task2 thread has panicked").unwrap(), 3);
    }

    #[test]
    fn test_repeated_polls_register_one_waker() {
        let promise = Promise::<i32>::pending();
        let mut settled: Settled<i32> = promise.settled();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut settled).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut settled).poll(&mut cx).is_pending());
        assert_eq!(promise.lock().wakers.len(), 1);

        promise.resolve(9);
        assert!(promise.lock().wakers.is_empty());
        assert!(matches!(Pin::new(&mut settled).poll(&mut cx), Poll::Ready(Ok(9))));
    }

    #[test]
    fn test_dropped_settled_releases_waker() {
        let promise = Promise::<i32>::pending();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut kept = promise.settled();
        for _ in 0..16 {
            let mut transient = promise.settled();
            assert!(Pin::new(&mut transient).poll(&mut cx).is_pending());
        }
        assert!(Pin::new(&mut kept).poll(&mut cx).is_pending());
        // Same waker, distinct futures: only the survivor stays registered.
        assert_eq!(promise.lock().wakers.len(), 1);

        promise.resolve(4);
        assert!(matches!(Pin::new(&mut kept).poll(&mut cx), Poll::Ready(Ok(4))));
    }
}

//! Task / Promise coroutine scaffolding (component C3), reworked onto
//! `std::future::Future` per spec §9's design note: "model Task as a Future
//! whose poll advances a state machine; the record's resume handle becomes
//! a stored Waker".
//!
//! There is no separate `Promise<T>` type the way the C++ original splits
//! coroutine-frame state from the handle that names it — a `Future` impl
//! *is* the frame, so [`Inner`] plays both roles at once: it is the
//! promise's result slot and continuation slot, and `Task<T>` is the
//! move-only handle spec §3 describes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::Error;

enum Slot<T> {
    /// Nobody has polled yet.
    Empty,
    /// Polled at least once; the stored waker is woken when the result
    /// lands. Re-polling before completion replaces it (the standard Future
    /// contract: only the most recent waker need be honored).
    Waiting(Waker),
    Value(T),
    Failed(Error),
    /// `await_resume` has already run; polling again is the "double-await"
    /// spec §4.1 says implementations may assert on.
    Taken,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
}

/// The write side of a [`Task`], held by whoever drives the operation to
/// completion (the reactor's worker thread). Calling
/// [`TaskWriter::complete`]/[`TaskWriter::fail`] is the Rust equivalent of
/// resuming a stored coroutine handle: it writes the result slot and wakes
/// whoever is parked on it, exactly once (spec §3's "at most one transition
/// from empty to value-or-failure").
pub(crate) struct TaskWriter<T> {
    inner: Arc<Inner<T>>,
}

impl<T> TaskWriter<T> {
    pub(crate) fn complete(self, value: T) {
        self.finish(Slot::Value(value));
    }

    pub(crate) fn fail(self, err: Error) {
        self.finish(Slot::Failed(err));
    }

    fn finish(self, result: Slot<T>) {
        let waker = {
            let mut slot = self.inner.slot.lock().unwrap();
            let previous = std::mem::replace(&mut *slot, result);
            match previous {
                Slot::Waiting(waker) => Some(waker),
                Slot::Empty => None,
                Slot::Value(_) | Slot::Failed(_) | Slot::Taken => {
                    unreachable!("operation record completed twice")
                }
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// A move-only handle to a suspended operation that will eventually produce
/// a value of type `T` or fail with an [`Error`] (spec §3).
///
/// Polling is the Rust analogue of `co_await`. Reading the result consumes
/// it: there is no way to observe the same completion twice.
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Build a fresh `Task`/writer pair. The writer is handed to the backend
/// that will eventually complete the operation; the `Task` is returned to
/// the caller of e.g. [`crate::reactor::Reactor::recv`].
pub(crate) fn pair<T>() -> (Task<T>, TaskWriter<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot::Empty),
    });
    let task = Task {
        inner: Arc::clone(&inner),
    };
    let writer = TaskWriter { inner };
    (task, writer)
}

/// An already-resolved `Task`, for error paths that never suspend (spec
/// §7's "Destroy record, fail the Task immediately without suspending").
pub(crate) fn ready<T>(result: Result<T, Error>) -> Task<T> {
    let inner = Arc::new(Inner {
        slot: Mutex::new(match result {
            Ok(v) => Slot::Value(v),
            Err(e) => Slot::Failed(e),
        }),
    });
    Task { inner }
}

impl<T> Future for Task<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.inner.slot.lock().unwrap();
        match &mut *slot {
            Slot::Empty | Slot::Waiting(_) => {
                *slot = Slot::Waiting(cx.waker().clone());
                Poll::Pending
            }
            Slot::Value(_) | Slot::Failed(_) => {
                let taken = std::mem::replace(&mut *slot, Slot::Taken);
                match taken {
                    Slot::Value(v) => Poll::Ready(Ok(v)),
                    Slot::Failed(e) => Poll::Ready(Err(e)),
                    _ => unreachable!(),
                }
            }
            Slot::Taken => {
                drop(slot);
                panic!("proactor::Task polled after it already resolved")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn completes_after_poll() {
        let (task, writer) = pair::<u32>();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            writer.complete(42);
        });
        let result = crate::executor::block_on(task);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn propagates_failure() {
        let (task, writer) = pair::<u32>();
        writer.fail(Error::Stopped);
        let result = crate::executor::block_on(task);
        assert!(matches!(result, Err(Error::Stopped)));
    }

    #[test]
    fn ready_task_resolves_immediately() {
        let task = ready::<u32>(Ok(7));
        let result = crate::executor::block_on(task);
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    #[should_panic(expected = "polled after it already resolved")]
    fn double_poll_after_ready_panics() {
        use std::future::Future;
        use std::pin::Pin;
        use std::task::{Context, Poll};

        let mut task = ready::<u32>(Ok(1));
        let waker = futures_noop_waker();
        let mut cx = Context::from_waker(&waker);
        let pinned = Pin::new(&mut task);
        assert!(matches!(pinned.poll(&mut cx), Poll::Ready(_)));
        let pinned = Pin::new(&mut task);
        let _ = pinned.poll(&mut cx);
    }

    fn futures_noop_waker() -> Waker {
        use std::task::{RawWaker, RawWakerVTable};

        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }
}

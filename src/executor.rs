//! A minimal current-thread driver for top-level [`crate::task::Task`]s.
//!
//! Spec §1 places "the worker-pool scheduler for CPU work" out of scope as
//! an external collaborator — this core only needs *something* to drive the
//! `Task` chain rooted at a user's call, the way `Reactor::run()` joining
//! the I/O thread stands in for a scheduler in the C++ original. `block_on`
//! is that something: it parks the calling thread between wakeups rather
//! than spinning, using the same waker-parks-a-thread trick common across
//! minimal async runtimes.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

struct Parker {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Arc<Self> {
        Arc::new(Parker {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    fn park(&self) {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.condvar.wait(ready).unwrap();
        }
        *ready = false;
    }

    fn unpark(&self) {
        let mut ready = self.ready.lock().unwrap();
        *ready = true;
        self.condvar.notify_one();
    }
}

fn waker_for(parker: Arc<Parker>) -> Waker {
    fn clone(ptr: *const ()) -> RawWaker {
        let parker = unsafe { Arc::from_raw(ptr as *const Parker) };
        let cloned = Arc::clone(&parker);
        std::mem::forget(parker);
        RawWaker::new(Arc::into_raw(cloned) as *const (), &VTABLE)
    }
    fn wake(ptr: *const ()) {
        let parker = unsafe { Arc::from_raw(ptr as *const Parker) };
        parker.unpark();
    }
    fn wake_by_ref(ptr: *const ()) {
        let parker = unsafe { Arc::from_raw(ptr as *const Parker) };
        parker.unpark();
        std::mem::forget(parker);
    }
    fn drop_raw(ptr: *const ()) {
        unsafe { drop(Arc::from_raw(ptr as *const Parker)) };
    }

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_raw);
    let raw = RawWaker::new(Arc::into_raw(parker) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

/// Drive `future` to completion on the calling thread, blocking between
/// wakeups. Suitable for driving exactly one top-level `Task` chain at a
/// time — this is not a multi-task scheduler.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = std::pin::pin!(future);
    let parker = Parker::new();
    let waker = waker_for(Arc::clone(&parker));
    let mut cx = Context::from_waker(&waker);

    loop {
        match Pin::as_mut(&mut future).poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => parker.park(),
        }
    }
}

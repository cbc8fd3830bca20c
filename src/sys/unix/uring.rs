//! Linux completion backend built on the real `io-uring` crate.
//!
//! Grounded on the submission/completion idiom shared by
//! `thomasbarrett-io-uring-async`, `uio-rs-libuio`'s per-op future builders,
//! and `warpy-ai-script`'s `IoUringReactor` (`opcode::*::new(...).build()`,
//! `user_data` as the correlation token, `unsafe { ring.submission().push() }`,
//! draining `ring.completion()` by `(user_data, result)` pairs). The shape
//! here is the same reactor loop, generalized onto this crate's `OpIndex`
//! arena instead of a `HashMap<u64, PendingOp>`.
//!
//! `ring` is deliberately not wrapped in a single `Mutex` held across the
//! blocking wait: the worker thread spends most of its time parked in
//! `submit_and_wait`, and a coroutine thread's `push` must never queue up
//! behind that (spec §5, "coroutine submission must not block"). Instead
//! `push_lock` serializes only the producer side — pushing SQEs from
//! whichever thread calls `submit_*` — while the completion side is read
//! exclusively by the one worker thread that owns `drain`. That's exactly
//! the multi-producer/single-consumer split the io-uring crate's
//! `submission_shared`/`completion_shared` methods exist for (both take
//! `&self`, unlike the exclusive `submission()`/`completion()`), and is the
//! same reasoning `hu00yan-rust-miniss`'s `IoUringBackend` and this crate's
//! own `IocpBackend` give for their manual `unsafe impl Sync`: the kernel,
//! not the Rust type system, is what actually synchronizes the two rings.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::Duration;

use io_uring::{opcode, types, IoUring};

use crate::op::OpIndex;

/// Sentinel `user_data` for the per-wait timeout SQE, chosen well outside the
/// range of real operation indices (the pool never holds `u32::MAX` live
/// records at once — spec's queue depth default is 1024).
const TIMEOUT_USER_DATA: u64 = u64::MAX;

/// Sentinel `user_data` for an `AsyncCancel` request's own completion — kept
/// distinct from `TIMEOUT_USER_DATA` so a cancel firing can never be mistaken
/// for the bounded-wait timeout and spuriously un-arm it.
const CANCEL_USER_DATA: u64 = u64::MAX - 1;

/// Tracks the single outstanding bounded-wait timeout SQE. A fresh `Timeout`
/// used to be pushed on every `drain` pass; under steady completion traffic
/// that left every prior one still armed in the kernel, each eventually
/// firing as a CQE nothing consumed. Re-arming only once the previous one
/// has actually fired keeps at most one outstanding at a time.
struct TimeoutState {
    armed: bool,
    ts: types::Timespec,
}

pub struct UringBackend {
    ring: IoUring,
    push_lock: Mutex<()>,
    timeout: Mutex<TimeoutState>,
}

// Safety: `ring`'s submission side is only ever touched through `push`,
// which serializes callers via `push_lock`; its completion side is only
// ever read from `drain`, called exclusively by the reactor's single
// worker thread. The submission and completion rings are independent
// kernel-shared memory regions with their own atomic head/tail, so this
// producer/consumer split needs no further synchronization between them.
unsafe impl Send for UringBackend {}
unsafe impl Sync for UringBackend {}

impl UringBackend {
    pub fn new(queue_depth: u32, sqpoll_idle: Option<Duration>) -> io::Result<Self> {
        let ring = if let Some(idle) = sqpoll_idle {
            IoUring::builder()
                .setup_sqpoll(idle.as_millis() as u32)
                .build(queue_depth)?
        } else {
            IoUring::new(queue_depth)?
        };
        Ok(UringBackend {
            ring,
            push_lock: Mutex::new(()),
            timeout: Mutex::new(TimeoutState {
                armed: false,
                ts: types::Timespec::new(),
            }),
        })
    }

    fn push(&self, entry: io_uring::squeue::Entry) -> io::Result<()> {
        let _guard = self.push_lock.lock().unwrap();
        // Safety: `push_lock` ensures exactly one thread touches the
        // submission queue's local tail at a time. The entry's pointers
        // (buffer, sockaddr) are borrowed from an `OperationRecord` payload
        // pinned inside the pool for as long as the record's index stays
        // live, which is exactly the submission's lifetime (see `op` module
        // docs).
        unsafe {
            while self.ring.submission_shared().push(&entry).is_err() {
                self.ring.submit()?;
            }
        }
        Ok(())
    }

    pub fn submit_accept(
        &self,
        index: OpIndex,
        listener: RawFd,
        addr_ptr: *mut libc::sockaddr,
        addr_len_ptr: *mut libc::socklen_t,
    ) -> io::Result<()> {
        let entry = opcode::Accept::new(types::Fd(listener), addr_ptr, addr_len_ptr)
            .build()
            .user_data(index.as_u64());
        self.push(entry)
    }

    pub fn submit_recv(
        &self,
        index: OpIndex,
        fd: RawFd,
        buf_ptr: *mut u8,
        buf_len: usize,
    ) -> io::Result<()> {
        let entry = opcode::Recv::new(types::Fd(fd), buf_ptr, buf_len as u32)
            .build()
            .user_data(index.as_u64());
        self.push(entry)
    }

    pub fn submit_send(
        &self,
        index: OpIndex,
        fd: RawFd,
        buf_ptr: *const u8,
        buf_len: usize,
    ) -> io::Result<()> {
        let entry = opcode::Send::new(types::Fd(fd), buf_ptr, buf_len as u32)
            .build()
            .user_data(index.as_u64());
        self.push(entry)
    }

    pub fn submit_connect(
        &self,
        index: OpIndex,
        fd: RawFd,
        addr_ptr: *const libc::sockaddr,
        addr_len: libc::socklen_t,
    ) -> io::Result<()> {
        let entry = opcode::Connect::new(types::Fd(fd), addr_ptr, addr_len)
            .build()
            .user_data(index.as_u64());
        self.push(entry)
    }

    /// Ask the kernel to cancel a submission that's still outstanding. Used
    /// by `Reactor::stop`'s abort-and-drain pass; a miss (the op already
    /// completed) is not an error. The cancel's own completion is tagged
    /// `CANCEL_USER_DATA` and discarded in `drain` — `abort_pending` already
    /// resolves the canceled operation itself without waiting on kernel
    /// confirmation of the cancel.
    pub fn cancel(&self, index: OpIndex) {
        let entry = opcode::AsyncCancel::new(index.as_u64())
            .build()
            .user_data(CANCEL_USER_DATA);
        let _ = self.push(entry);
    }

    /// Arms the bounded-wait timeout if none is currently outstanding.
    /// `state.ts` lives behind `self.timeout`'s mutex at a stable address
    /// for as long as this backend exists (it's reached through an `Arc`),
    /// so the pointer handed to the kernel stays valid for as long as the
    /// timeout stays armed — and `drain` only clears `armed` once that same
    /// timeout's own CQE has actually been observed.
    fn arm_timeout(&self, timeout: Duration) {
        let mut state = self.timeout.lock().unwrap();
        if state.armed {
            return;
        }
        state.ts = types::Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());
        let entry = opcode::Timeout::new(&state.ts as *const _)
            .build()
            .user_data(TIMEOUT_USER_DATA);
        state.armed = true;
        drop(state);
        if self.push(entry).is_err() {
            // Queue was full and couldn't be flushed; retry arming on the
            // next drain pass instead of leaving `armed` stuck true with
            // nothing actually submitted.
            self.timeout.lock().unwrap().armed = false;
        }
    }

    /// Submit everything queued so far and block for up to `timeout`
    /// waiting for at least one completion, draining whatever is ready.
    /// Bounding the wait with a linked timeout SQE is what lets
    /// `Reactor::stop` notice the shutdown flag without a separate wake
    /// signal on this backend. `submit_and_wait` takes `&self` and runs
    /// without `push_lock` held, so a coroutine thread's own submission
    /// never waits behind it.
    pub fn drain(&self, timeout: Duration) -> Vec<(OpIndex, i64)> {
        self.arm_timeout(timeout);

        // ETIME just means the bound elapsed with nothing ready; anything
        // else submitting a timeout-guarded wait fails with is a real error
        // the worker loop can't act on, so it's swallowed the same way.
        let _ = self.ring.submit_and_wait(1);

        let mut completions = Vec::new();
        for cqe in unsafe { self.ring.completion_shared() } {
            match cqe.user_data() {
                TIMEOUT_USER_DATA => {
                    self.timeout.lock().unwrap().armed = false;
                }
                CANCEL_USER_DATA => {}
                user_data => completions.push((OpIndex::from_u64(user_data), cqe.result() as i64)),
            }
        }
        completions
    }

    /// No-op on this backend: the bounded wait in `drain` is what lets
    /// `stop()` notice the shutdown flag promptly, the same way IOCP uses a
    /// posted null completion instead.
    pub fn wake(&self) {}
}

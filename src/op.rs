//! Operation records and the synchronized memory pool they live in
//! (component C4).
//!
//! Every in-flight kernel operation is represented by an [`OperationRecord`]
//! held in a [`Pool`] — a `slab`-backed arena (spec §9: "arena+index is
//! safer than raw pointer ... and avoids the container-of trick"). The
//! record's slab index, not its address, is what the backends pass to the
//! kernel: as io_uring's 64-bit `user_data` directly, and as the correlation
//! key embedded alongside the `OVERLAPPED` on Windows.
//!
//! The slab stores `Box<OperationRecord>`, not `OperationRecord` inline:
//! growing a `slab::Slab<T>` reallocates its backing `Vec<T>` and moves every
//! live `T`, which would dangle any raw pointer a backend handed to the
//! kernel mid-submission. Boxing means growth only ever moves pointers to
//! records, never the record bytes themselves — the pinned-buffer invariant
//! the async connect/recv/send paths depend on.

use std::sync::Mutex;

/// Tag identifying which reactor operation a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Accept,
    Recv,
    Send,
    Connect,
}

/// Result code an aborted-but-unresolved operation is resolved with when
/// `Reactor::stop` drains the pool without waiting for the kernel to confirm
/// cancellation. Chosen well outside the range of real `-errno`/mapped
/// HRESULT values, which never approach `i64::MIN`.
pub const CANCELED: i64 = i64::MIN;

impl OpKind {
    /// Name used in [`crate::error::Error`] variants, so failures read
    /// "accept failed" rather than a bare debug tag.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Accept => "accept",
            OpKind::Recv => "recv",
            OpKind::Send => "send",
            OpKind::Connect => "connect",
        }
    }
}

/// Operation-specific payload. Each variant owns everything the kernel needs
/// a stable pointer to for the lifetime of the submission (spec §4.2's
/// "pinned buffer" invariant).
pub enum Payload {
    Accept {
        /// Zeroed storage the kernel writes the peer address into. Sized by
        /// the listener's family (REDESIGN FLAG c) — never hard-coded IPv4.
        #[cfg(target_os = "linux")]
        addr: crate::sys::unix::socket::SockAddrStorage,
        /// Pre-created socket handle `AcceptEx` accepts into; Windows has no
        /// equivalent of io_uring's "kernel hands back a fresh fd".
        #[cfg(windows)]
        accepted_socket: crate::sys::windows::socket::RawSocket,
    },
    Recv {
        buffer: Vec<u8>,
    },
    Send {
        data: Vec<u8>,
    },
    Connect {
        #[cfg(target_os = "linux")]
        addr: crate::sys::unix::socket::SockAddrStorage,
        #[cfg(windows)]
        addr: crate::sys::windows::socket::SockAddrStorage,
    },
}

/// A pool-allocated record shared between a submitting coroutine and the
/// reactor's worker thread (spec §3's `OperationRecord`).
///
/// `completion` is the Rust stand-in for the C++ original's stored coroutine
/// handle: a type-erased closure that knows how to turn a raw signed result
/// code plus the record's own payload into the right `Task<T>` outcome for
/// this operation's `T` (a `Socket` for accept, `Vec<u8>` for recv, and so
/// on) and deliver it through the matching [`crate::task::TaskWriter`]. It is
/// consumed exactly once, by the worker thread that observes completion.
pub struct OperationRecord {
    pub kind: OpKind,
    pub payload: Payload,
    /// The socket this operation runs against. Windows' `CancelIoEx` takes
    /// a handle, not an operation token, so `Reactor::stop`'s abort pass
    /// needs this even though the Linux backend cancels by index alone.
    pub handle: crate::sys::RawSocket,
    completion: Option<Box<dyn FnOnce(Payload, i64) + Send>>,
}

impl OperationRecord {
    fn new(
        kind: OpKind,
        payload: Payload,
        handle: crate::sys::RawSocket,
        completion: Box<dyn FnOnce(Payload, i64) + Send>,
    ) -> Self {
        OperationRecord {
            kind,
            payload,
            handle,
            completion: Some(completion),
        }
    }

    /// Run the stored completion against `result`, consuming both. Panics if
    /// called twice on the same record — the `Submitted → Completed` edge in
    /// spec §4.5's lifecycle only ever fires once per record.
    pub fn resolve(mut self, result: i64) {
        let completion = self
            .completion
            .take()
            .expect("operation record resolved twice");
        completion(self.payload, result);
    }
}

/// Stable index into a [`Pool`]. This is what crosses into kernel-visible
/// state (io_uring `user_data`, IOCP completion key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpIndex(pub u64);

impl OpIndex {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        OpIndex(raw)
    }
}

/// The synchronized small-object pool backing all operation records
/// (spec §4.2). `slab::Slab` gives us generation-free stable-index reuse at
/// the cost of a free list walk on alloc, which is exactly the tradeoff the
/// spec calls for ("capacity = queue depth").
pub struct Pool {
    slab: Mutex<slab::Slab<Box<OperationRecord>>>,
}

impl Pool {
    pub fn with_capacity(capacity: usize) -> Self {
        Pool {
            slab: Mutex::new(slab::Slab::with_capacity(capacity)),
        }
    }

    /// Allocate a record and return its stable index. Safe to call from any
    /// coroutine thread (spec §5).
    pub fn insert(
        &self,
        kind: OpKind,
        payload: Payload,
        handle: crate::sys::RawSocket,
        completion: Box<dyn FnOnce(Payload, i64) + Send>,
    ) -> OpIndex {
        let mut slab = self.slab.lock().unwrap();
        let key = slab.insert(Box::new(OperationRecord::new(kind, payload, handle, completion)));
        OpIndex(key as u64)
    }

    /// Run `f` with exclusive access to the record at `index`. Used to reach
    /// into `payload` for the raw pointer a backend's `submit_*` needs —
    /// the pointer stays valid after the lock is released because the record
    /// is boxed (see module docs).
    pub fn with<R>(&self, index: OpIndex, f: impl FnOnce(&mut OperationRecord) -> R) -> Option<R> {
        let mut slab = self.slab.lock().unwrap();
        slab.get_mut(index.0 as usize).map(|boxed| f(boxed))
    }

    /// Release the record at `index` back to the free list, returning it so
    /// the caller can resolve it outside the pool's lock.
    pub fn remove(&self, index: OpIndex) -> Option<OperationRecord> {
        let mut slab = self.slab.lock().unwrap();
        if slab.contains(index.0 as usize) {
            Some(*slab.remove(index.0 as usize))
        } else {
            None
        }
    }

    /// All currently live indices — used by `stop()` to abort pending
    /// operations (spec §5, explicit abort-and-drain).
    pub fn live_indices(&self) -> Vec<OpIndex> {
        let slab = self.slab.lock().unwrap();
        slab.iter().map(|(key, _)| OpIndex(key as u64)).collect()
    }

    /// Number of records currently allocated. Used by integration tests to
    /// assert the pool returns to zero after all awaiters run (spec §8 S6).
    pub fn len(&self) -> usize {
        self.slab.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

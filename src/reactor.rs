//! The reactor facade (component C7) — the crate's single public entry
//! point for submitting I/O.
//!
//! Grounded on the C++ original's `Reactor`/`ReactorIoUring`/`ReactorIocp`
//! split (`include/tws/async/reactor*.hpp`, `src/async/reactor*.cpp`): one
//! config struct, one worker thread per reactor, four operations that each
//! allocate a record, hand it to the platform backend, and return something
//! awaitable. The `Submitted → Completed → Resumed → Released` lifecycle
//! (spec §4.5) is implemented here rather than in `op` or the backends:
//! *Submitted* is this module calling `backend.submit_*`, *Completed* is the
//! worker thread draining `backend.drain`, *Resumed* is whatever polls the
//! returned [`Task`], and *Released* is `op::Pool::remove` handing the
//! record back so `OperationRecord::resolve` can consume it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::op::{self, OpKind, Payload, Pool};
use crate::socket::Socket;
use crate::sys;
use crate::task::{self, Task};

/// Tuning knobs for a [`Reactor`] (spec §4.4). `queue_depth` sizes both the
/// operation pool and, on Linux, the io_uring itself; `completion_timeout`
/// bounds how long a drain pass blocks, which is what lets `stop()` notice
/// the shutdown flag without a dedicated wake primitive on every backend.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    pub queue_depth: u32,
    pub completion_timeout: Duration,
    /// Fixed at 1 — this core drives one completion-draining thread per
    /// reactor and leaves fanning I/O out across more of them to whatever
    /// schedules the `Task`s it produces (spec §1's explicit non-goal).
    pub worker_count: usize,
    /// Linux-only: have the kernel poll the submission queue instead of
    /// requiring an `io_uring_enter` per submission. Ignored on Windows.
    pub sqpoll_idle: Option<Duration>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig {
            queue_depth: 1024,
            completion_timeout: Duration::from_millis(1000),
            worker_count: 1,
            sqpoll_idle: None,
        }
    }
}

impl ReactorConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.worker_count != 1 {
            return Err(Error::InvalidArgument {
                op: "Reactor::new",
                reason: "worker_count must be 1",
            });
        }
        if self.queue_depth == 0 {
            return Err(Error::InvalidArgument {
                op: "Reactor::new",
                reason: "queue_depth must be nonzero",
            });
        }
        Ok(())
    }
}

/// The proactor itself: a submission API plus the single worker thread that
/// drains completions for it. Cheap to hand around by reference; `stop()`
/// and `drop()` are both idempotent.
pub struct Reactor {
    pool: Arc<Pool>,
    backend: Arc<sys::Backend>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    #[cfg(windows)]
    associated: Mutex<std::collections::HashSet<sys::RawSocket>>,
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> Result<Self, Error> {
        config.validate()?;
        tracing::debug!(queue_depth = config.queue_depth, "starting reactor");

        let backend = Arc::new(make_backend(&config).map_err(|source| Error::Submit {
            op: "Reactor::new",
            source,
        })?);
        let pool = Arc::new(Pool::with_capacity(config.queue_depth as usize));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let pool = Arc::clone(&pool);
            let backend = Arc::clone(&backend);
            let running = Arc::clone(&running);
            let timeout = config.completion_timeout;
            std::thread::Builder::new()
                .name("proactor-worker".into())
                .spawn(move || worker_loop(pool, backend, running, timeout))
                .expect("failed to spawn proactor worker thread")
        };

        Ok(Reactor {
            pool,
            backend,
            running,
            worker: Mutex::new(Some(worker)),
            #[cfg(windows)]
            associated: Mutex::new(std::collections::HashSet::new()),
        })
    }

    /// Stops accepting new submissions, cancels everything in flight, and
    /// joins the worker thread. Safe to call more than once or from inside
    /// a `Drop` — only the first call does anything (spec §4.5).
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::debug!("stopping reactor");
            self.backend.wake();
            if let Some(handle) = self.worker.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
    }

    fn rejected_if_stopped<T>(&self) -> Option<Task<T>> {
        if self.running.load(Ordering::Acquire) {
            None
        } else {
            Some(task::ready(Err(Error::Stopped)))
        }
    }

    #[cfg(windows)]
    fn ensure_associated(&self, handle: sys::RawSocket) -> io::Result<()> {
        let mut associated = self.associated.lock().unwrap();
        if associated.insert(handle) {
            self.backend.associate(handle)?;
        }
        Ok(())
    }

    /// Accepts one connection on `listener`. The accepted socket's address
    /// family always matches the listener's (REDESIGN FLAG c) — there is no
    /// code path here that can default to IPv4.
    pub fn accept(&self, listener: &Socket) -> Task<Socket> {
        if let Some(rejected) = self.rejected_if_stopped() {
            return rejected;
        }
        let listener_handle = listener.native_handle();

        #[cfg(target_os = "linux")]
        {
            use crate::sys::unix::socket::SockAddrStorage;
            use std::os::unix::io::FromRawFd;

            let ipv6 = matches!(listener.local_addr(), Ok(SocketAddr::V6(_)));
            let payload = Payload::Accept {
                addr: SockAddrStorage::for_accept(ipv6),
            };
            let (task, writer) = task::pair::<Socket>();
            let completion = Box::new(move |_payload: Payload, result: i64| {
                if result == op::CANCELED {
                    writer.fail(Error::Canceled);
                    return;
                }
                if result < 0 {
                    writer.fail(Error::Completion {
                        op: OpKind::Accept.name(),
                        source: io::Error::from_raw_os_error(-result as i32),
                    });
                    return;
                }
                let inner = unsafe { sys::Socket::from_raw_fd(result as std::os::unix::io::RawFd) };
                writer.complete(Socket::from_inner(inner));
            });

            let index = self.pool.insert(OpKind::Accept, payload, listener_handle, completion);
            let submitted = self
                .pool
                .with(index, |record| match &mut record.payload {
                    Payload::Accept { addr } => self.backend.submit_accept(
                        index,
                        listener_handle,
                        addr.as_mut_ptr(),
                        addr.len_mut(),
                    ),
                    _ => unreachable!(),
                })
                .expect("record just inserted");

            if let Err(source) = submitted {
                self.pool.remove(index);
                return task::ready(Err(Error::Submit { op: "accept", source }));
            }
            task
        }

        #[cfg(windows)]
        {
            use crate::sys::windows::socket::Socket as RawWinSocket;

            if let Err(source) = self.ensure_associated(listener_handle) {
                return task::ready(Err(Error::Submit { op: "accept", source }));
            }
            let accepted = match listener.local_addr() {
                Ok(addr) => RawWinSocket::for_addr(addr, crate::socket::stream_type()),
                Err(source) => return task::ready(Err(Error::Submit { op: "accept", source })),
            };
            let accepted = match accepted {
                Ok(socket) => socket,
                Err(source) => return task::ready(Err(Error::Submit { op: "accept", source })),
            };
            let accepted_handle = accepted.as_raw();
            let payload = Payload::Accept { accepted_socket: accepted_handle };
            let (task, writer) = task::pair::<Socket>();
            let completion = Box::new(move |_payload: Payload, result: i64| {
                if result == op::CANCELED {
                    writer.fail(Error::Canceled);
                    return;
                }
                if result < 0 {
                    writer.fail(Error::Completion {
                        op: OpKind::Accept.name(),
                        source: io::Error::from_raw_os_error(-result as i32),
                    });
                    return;
                }
                let socket = unsafe { RawWinSocket::from_raw(accepted_handle) };
                writer.complete(Socket::from_inner(socket));
            });

            std::mem::forget(accepted); // ownership now lives in the completion closure above
            let index = self.pool.insert(OpKind::Accept, payload, listener_handle, completion);
            let submitted = self.backend.submit_accept(index, listener_handle, accepted_handle);
            if let Err(source) = submitted {
                self.pool.remove(index); // drops the completion closure unexecuted
                unsafe { drop(RawWinSocket::from_raw(accepted_handle)) }; // so close the handle ourselves
                return task::ready(Err(Error::Submit { op: "accept", source }));
            }
            task
        }
    }

    /// Reads at most `size` bytes from `socket`. `size` must be nonzero
    /// (spec §6's documented invalid-argument case).
    pub fn recv(&self, socket: &Socket, size: usize) -> Task<Vec<u8>> {
        if size == 0 {
            return task::ready(Err(Error::InvalidArgument {
                op: "recv",
                reason: "size must be nonzero",
            }));
        }
        if let Some(rejected) = self.rejected_if_stopped() {
            return rejected;
        }
        let handle = socket.native_handle();

        #[cfg(windows)]
        if let Err(source) = self.ensure_associated(handle) {
            return task::ready(Err(Error::Submit { op: "recv", source }));
        }

        let payload = Payload::Recv { buffer: vec![0u8; size] };
        let (task, writer) = task::pair::<Vec<u8>>();
        let completion = Box::new(move |payload: Payload, result: i64| {
            if result == op::CANCELED {
                writer.fail(Error::Canceled);
                return;
            }
            if result < 0 {
                writer.fail(Error::Completion {
                    op: OpKind::Recv.name(),
                    source: io::Error::from_raw_os_error(-result as i32),
                });
                return;
            }
            let mut buffer = match payload {
                Payload::Recv { buffer } => buffer,
                _ => unreachable!(),
            };
            buffer.truncate(result as usize);
            writer.complete(buffer);
        });

        let index = self.pool.insert(OpKind::Recv, payload, handle, completion);
        let submitted = self
            .pool
            .with(index, |record| match &mut record.payload {
                #[cfg(target_os = "linux")]
                Payload::Recv { buffer } => {
                    self.backend
                        .submit_recv(index, handle, buffer.as_mut_ptr(), buffer.len())
                }
                #[cfg(windows)]
                Payload::Recv { buffer } => self.backend.submit_recv(index, handle, buffer),
                _ => unreachable!(),
            })
            .expect("record just inserted");

        if let Err(source) = submitted {
            self.pool.remove(index);
            return task::ready(Err(Error::Submit { op: "recv", source }));
        }
        task
    }

    /// Writes `data` to `socket`. An empty slice is a valid no-op that
    /// resolves to `0` without being submitted at all.
    pub fn send(&self, socket: &Socket, data: &[u8]) -> Task<usize> {
        if data.is_empty() {
            return task::ready(Ok(0));
        }
        if let Some(rejected) = self.rejected_if_stopped() {
            return rejected;
        }
        let handle = socket.native_handle();

        #[cfg(windows)]
        if let Err(source) = self.ensure_associated(handle) {
            return task::ready(Err(Error::Submit { op: "send", source }));
        }

        let payload = Payload::Send { data: data.to_vec() };
        let (task, writer) = task::pair::<usize>();
        let completion = Box::new(move |_payload: Payload, result: i64| {
            if result == op::CANCELED {
                writer.fail(Error::Canceled);
                return;
            }
            if result < 0 {
                writer.fail(Error::Completion {
                    op: OpKind::Send.name(),
                    source: io::Error::from_raw_os_error(-result as i32),
                });
                return;
            }
            writer.complete(result as usize);
        });

        let index = self.pool.insert(OpKind::Send, payload, handle, completion);
        let submitted = self
            .pool
            .with(index, |record| match &record.payload {
                #[cfg(target_os = "linux")]
                Payload::Send { data } => self.backend.submit_send(index, handle, data.as_ptr(), data.len()),
                #[cfg(windows)]
                Payload::Send { data } => self.backend.submit_send(index, handle, data),
                _ => unreachable!(),
            })
            .expect("record just inserted");

        if let Err(source) = submitted {
            self.pool.remove(index);
            return task::ready(Err(Error::Submit { op: "send", source }));
        }
        task
    }

    /// Connects `socket` to `endpoint`.
    pub fn connect(&self, socket: &Socket, endpoint: Endpoint) -> Task<()> {
        if let Some(rejected) = self.rejected_if_stopped() {
            return rejected;
        }
        let handle = socket.native_handle();
        let addr = endpoint.to_socket_addr();

        #[cfg(target_os = "linux")]
        {
            use crate::sys::unix::socket::SockAddrStorage;

            let payload = Payload::Connect { addr: SockAddrStorage::from(addr) };
            let (task, writer) = task::pair::<()>();
            let completion = Box::new(move |_payload: Payload, result: i64| {
                if result == op::CANCELED {
                    writer.fail(Error::Canceled);
                    return;
                }
                if result < 0 {
                    writer.fail(Error::Completion {
                        op: OpKind::Connect.name(),
                        source: io::Error::from_raw_os_error(-result as i32),
                    });
                    return;
                }
                writer.complete(());
            });

            let index = self.pool.insert(OpKind::Connect, payload, handle, completion);
            let submitted = self
                .pool
                .with(index, |record| match &record.payload {
                    Payload::Connect { addr } => {
                        self.backend.submit_connect(index, handle, addr.as_ptr(), addr.len())
                    }
                    _ => unreachable!(),
                })
                .expect("record just inserted");

            if let Err(source) = submitted {
                self.pool.remove(index);
                return task::ready(Err(Error::Submit { op: "connect", source }));
            }
            task
        }

        #[cfg(windows)]
        {
            use crate::sys::windows::socket::SockAddrStorage;

            if let Err(source) = self.ensure_associated(handle) {
                return task::ready(Err(Error::Submit { op: "connect", source }));
            }
            // ConnectEx requires the socket be bound before it's usable,
            // even to an unspecified local address.
            let unspecified = if addr.is_ipv6() {
                SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), 0)
            } else {
                SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0)
            };
            if let Err(source) = socket.bind(unspecified) {
                return task::ready(Err(Error::Submit { op: "connect", source }));
            }

            let payload = Payload::Connect { addr: SockAddrStorage::from(addr) };
            let (task, writer) = task::pair::<()>();
            let completion = Box::new(move |_payload: Payload, result: i64| {
                if result == op::CANCELED {
                    writer.fail(Error::Canceled);
                    return;
                }
                if result < 0 {
                    writer.fail(Error::Completion {
                        op: OpKind::Connect.name(),
                        source: io::Error::from_raw_os_error(-result as i32),
                    });
                    return;
                }
                writer.complete(());
            });

            let index = self.pool.insert(OpKind::Connect, payload, handle, completion);
            let submitted = self
                .pool
                .with(index, |record| match &record.payload {
                    Payload::Connect { addr } => {
                        self.backend.submit_connect(index, handle, addr.as_ptr(), addr.len())
                    }
                    _ => unreachable!(),
                })
                .expect("record just inserted");

            if let Err(source) = submitted {
                self.pool.remove(index);
                return task::ready(Err(Error::Submit { op: "connect", source }));
            }
            task
        }
    }

    /// Number of operations currently in flight. Exposed for tests that
    /// assert the pool drains back to zero (spec §8 S6).
    pub fn pending_count(&self) -> usize {
        self.pool.len()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(pool: Arc<Pool>, backend: Arc<sys::Backend>, running: Arc<AtomicBool>, timeout: Duration) {
    while running.load(Ordering::Acquire) {
        let completions = backend.drain(timeout);
        for (index, result) in completions {
            if let Some(record) = pool.remove(index) {
                record.resolve(result);
            }
        }
    }
    abort_pending(&pool, &backend);
}

fn abort_pending(pool: &Pool, backend: &sys::Backend) {
    for index in pool.live_indices() {
        if let Some(record) = pool.remove(index) {
            #[cfg(target_os = "linux")]
            backend.cancel(index);
            #[cfg(windows)]
            backend.cancel_socket(record.handle);
            record.resolve(op::CANCELED);
        }
    }
}

#[cfg(target_os = "linux")]
fn make_backend(config: &ReactorConfig) -> io::Result<sys::Backend> {
    sys::Backend::new(config.queue_depth, config.sqpoll_idle)
}

#[cfg(windows)]
fn make_backend(_config: &ReactorConfig) -> io::Result<sys::Backend> {
    sys::Backend::new()
}

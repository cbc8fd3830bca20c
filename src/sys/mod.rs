//! Platform shim (component C1).
//!
//! Exposes a uniform socket-handle type, a close primitive, and the
//! completion backend for each supported host. Everything else in the crate
//! is written against the types re-exported here, never against `libc` or
//! `windows-sys` directly.
//!
//! The two backends this crate targets — io_uring and IOCP — only exist on
//! Linux and Windows respectively, so unlike mio (which treats every unix a
//! single epoll-based family) the `unix` module here is gated on
//! `target_os = "linux"` specifically rather than `cfg(unix)`.

#[cfg(target_os = "linux")]
pub(crate) mod unix;
#[cfg(target_os = "linux")]
pub use unix::{last_os_error, socket::RawSocket, socket::Socket, uring::UringBackend as Backend};

#[cfg(windows)]
pub(crate) mod windows;
#[cfg(windows)]
pub use windows::{
    iocp::IocpBackend as Backend, last_os_error, socket::RawSocket, socket::Socket,
};

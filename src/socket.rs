//! The cross-platform socket facade (component C2): a thin, move-only
//! wrapper around whichever raw handle `sys::Socket` is on this platform.
//!
//! Grounded on the C++ original's `tws::net::Socket` (`include/tws/net/
//! socket.hpp`) for the surface — `bind`/`listen`/`setOptions`/
//! `nativeHandle`/`isValid` — and on mio's `TcpSocket` (`src/net/tcp/
//! socket.rs`) for how to express that surface in Rust: a struct holding
//! one `sys` handle, `Drop` closing it, every method a thin delegation.

use std::io;
use std::net::SocketAddr;

use crate::sys;

/// Options applied at socket construction or before the first I/O
/// operation. Mirrors the original's `Socket::Options` aggregate; `Reactor`
/// doesn't touch any of these directly; user code sets them up front.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub reuse_address: bool,
    pub no_delay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            reuse_address: true,
            no_delay: true,
        }
    }
}

/// A non-blocking TCP socket. Every socket the reactor operates on —
/// listeners, accepted peers, outbound connections — is one of these.
///
/// Move-only: there is exactly one owner of the underlying handle at a
/// time, and it is closed exactly once, on drop (spec §4.6).
pub struct Socket {
    inner: sys::Socket,
}

impl Socket {
    /// Opens a fresh TCP socket for `addr`'s family and applies `options`.
    pub fn stream(addr: SocketAddr, options: SocketOptions) -> io::Result<Self> {
        let inner = sys::Socket::for_addr(addr, stream_type())?;
        let socket = Socket { inner };
        if options.reuse_address {
            socket.inner.set_reuseaddr(true)?;
        }
        if options.no_delay {
            socket.inner.set_nodelay(true)?;
        }
        socket.inner.set_nonblocking(true)?;
        Ok(socket)
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        self.inner.bind(addr)
    }

    pub fn listen(&self, backlog: u32) -> io::Result<()> {
        self.inner.listen(backlog)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn native_handle(&self) -> sys::RawSocket {
        raw_handle(&self.inner)
    }

    pub(crate) fn into_inner(self) -> sys::Socket {
        self.inner
    }

    pub(crate) fn from_inner(inner: sys::Socket) -> Self {
        Socket { inner }
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn stream_type() -> libc::c_int {
    libc::SOCK_STREAM
}

#[cfg(windows)]
pub(crate) fn stream_type() -> i32 {
    windows_sys::Win32::Networking::WinSock::SOCK_STREAM as i32
}

#[cfg(target_os = "linux")]
fn raw_handle(inner: &sys::Socket) -> sys::RawSocket {
    use std::os::unix::io::AsRawFd;
    inner.as_raw_fd()
}

#[cfg(windows)]
fn raw_handle(inner: &sys::Socket) -> sys::RawSocket {
    inner.as_raw()
}

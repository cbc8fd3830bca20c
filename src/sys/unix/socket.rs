//! Blocking socket primitives used only outside the hot path: create, bind,
//! listen, setsockopt, nonblocking toggle. Grounded on mio's own
//! `sys/unix/socket.rs` raw-fd wrapper.

use super::syscall;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

pub type RawSocket = RawFd;

/// Lowest-level non-blocking socket handle. One per open connection or
/// listener; closed exactly once on drop.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

impl Socket {
    pub fn new_v4(ty: libc::c_int) -> io::Result<Self> {
        Self::new(libc::AF_INET, ty)
    }

    pub fn new_v6(ty: libc::c_int) -> io::Result<Self> {
        Self::new(libc::AF_INET6, ty)
    }

    pub fn for_addr(addr: SocketAddr, ty: libc::c_int) -> io::Result<Self> {
        if addr.is_ipv4() {
            Self::new_v4(ty)
        } else {
            Self::new_v6(ty)
        }
    }

    fn new(domain: libc::c_int, mut ty: libc::c_int) -> io::Result<Self> {
        ty |= libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
        let fd = syscall!(socket(domain, ty, 0))?;
        Ok(unsafe { Socket::from_raw_fd(fd) })
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let storage = SockAddrStorage::from(addr);
        syscall!(bind(self.fd, storage.as_ptr(), storage.len())).map(drop)
    }

    pub fn listen(&self, backlog: u32) -> io::Result<()> {
        syscall!(listen(self.fd, backlog as libc::c_int)).map(drop)
    }

    pub fn set_reuseaddr(&self, enable: bool) -> io::Result<()> {
        let val: libc::c_int = enable as libc::c_int;
        syscall!(setsockopt(
            self.fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &val as *const _ as *const libc::c_void,
            mem::size_of_val(&val) as libc::socklen_t,
        ))
        .map(drop)
    }

    pub fn set_nodelay(&self, enable: bool) -> io::Result<()> {
        let val: libc::c_int = enable as libc::c_int;
        syscall!(setsockopt(
            self.fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &val as *const _ as *const libc::c_void,
            mem::size_of_val(&val) as libc::socklen_t,
        ))
        .map(drop)
    }

    /// Always non-blocking: every socket is created with `SOCK_NONBLOCK`, and
    /// the reactor never expects to toggle it. Kept for interface parity
    /// with spec §6's `setNonBlocking(true)`; a `false` argument is rejected
    /// since this core never does blocking I/O on a reactor-owned socket.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        if !nonblocking {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "proactor sockets are always non-blocking",
            ));
        }
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as libc::socklen_t;
        syscall!(getsockname(
            self.fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        ))?;
        from_sockaddr(&storage)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = syscall!(close(self.fd));
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Socket { fd }
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

/// An owned, pinned-size `sockaddr_in`/`sockaddr_in6` encoding of a
/// `SocketAddr`. Connect operations store one of these inline in their
/// [`crate::op::OperationRecord`] payload so the pointer handed to
/// `io_uring_prep_connect` stays valid from submission to completion.
#[derive(Clone, Copy)]
pub struct SockAddrStorage {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl SockAddrStorage {
    pub fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const _ as *const libc::sockaddr
    }

    pub fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        &mut self.storage as *mut _ as *mut libc::sockaddr
    }

    pub fn len(&self) -> libc::socklen_t {
        self.len
    }

    pub fn len_mut(&mut self) -> &mut libc::socklen_t {
        &mut self.len
    }

    pub fn to_socket_addr(&self) -> io::Result<SocketAddr> {
        from_sockaddr(&self.storage)
    }

    /// A zeroed, max-sized buffer for an incoming `accept(2)` address —
    /// sized for the family of `listener` (spec REDESIGN FLAG (c): never
    /// hard-code IPv4 here).
    pub fn for_accept(family_is_ipv6: bool) -> Self {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        storage.ss_family = if family_is_ipv6 {
            libc::AF_INET6 as libc::sa_family_t
        } else {
            libc::AF_INET as libc::sa_family_t
        };
        let len = if family_is_ipv6 {
            mem::size_of::<libc::sockaddr_in6>()
        } else {
            mem::size_of::<libc::sockaddr_in>()
        } as libc::socklen_t;
        SockAddrStorage { storage, len }
    }
}

impl From<SocketAddr> for SockAddrStorage {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => {
                let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
                raw.sin_family = libc::AF_INET as libc::sa_family_t;
                raw.sin_port = v4.port().to_be();
                raw.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        &raw as *const _ as *const u8,
                        &mut storage as *mut _ as *mut u8,
                        mem::size_of::<libc::sockaddr_in>(),
                    );
                }
                SockAddrStorage {
                    storage,
                    len: mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                }
            }
            SocketAddr::V6(v6) => {
                let mut raw: libc::sockaddr_in6 = unsafe { mem::zeroed() };
                raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                raw.sin6_port = v6.port().to_be();
                raw.sin6_addr.s6_addr = v6.ip().octets();
                let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        &raw as *const _ as *const u8,
                        &mut storage as *mut _ as *mut u8,
                        mem::size_of::<libc::sockaddr_in6>(),
                    );
                }
                SockAddrStorage {
                    storage,
                    len: mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                }
            }
        }
    }
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in =
                unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(u32::from_ne_bytes(addr.sin_addr.s_addr.to_ne_bytes()));
            Ok(SocketAddr::new(ip.into(), u16::from_be(addr.sin_port)))
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 =
                unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(SocketAddr::new(ip.into(), u16::from_be(addr.sin6_port)))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {family}"),
        )),
    }
}

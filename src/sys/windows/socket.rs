//! Blocking socket primitives used only outside the hot path: create, bind,
//! listen, setsockopt, nonblocking toggle. Mirrors `sys::unix::socket`'s
//! shape so `sys::Socket` reads the same on both platforms; the winsock
//! calls themselves are grounded on the C++ original's `Socket::bind`/
//! `Socket::listen`/`Socket::setOptions` (`include/tws/net/socket.hpp`).

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::OnceLock;

use windows_sys::Win32::Networking::WinSock::{
    bind, closesocket, getsockname, ioctlsocket, listen, setsockopt, socket, WSACleanup,
    WSAGetLastError, WSAStartup, AF_INET, AF_INET6, FIONBIO, INVALID_SOCKET, IPPROTO_TCP,
    SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE, SOCK_STREAM, SOL_SOCKET, SO_REUSEADDR,
    TCP_NODELAY, WSADATA,
};

/// `std::os::windows::io::RawSocket` is also a `u64`; kept as a local alias
/// so this module (and `op::Payload`) don't have to depend on `std`'s
/// windows-only `io` re-exports directly.
pub type RawSocket = u64;

static WINSOCK: OnceLock<()> = OnceLock::new();

/// Loads Winsock exactly once per process. Every path that creates a socket
/// goes through [`Socket::new`], so this runs before the first syscall that
/// needs it — the Rust equivalent of the C++ original's static initializer
/// for `WSAStartup`/`WSACleanup`.
fn ensure_winsock() {
    WINSOCK.get_or_init(|| unsafe {
        let mut data: WSADATA = mem::zeroed();
        let rc = WSAStartup(0x0202, &mut data);
        assert_eq!(rc, 0, "WSAStartup failed with code {rc}");
    });
}

#[derive(Debug)]
pub struct Socket {
    raw: RawSocket,
}

impl Socket {
    pub fn new_v4(ty: i32) -> io::Result<Self> {
        Self::new(AF_INET as i32, ty)
    }

    pub fn new_v6(ty: i32) -> io::Result<Self> {
        Self::new(AF_INET6 as i32, ty)
    }

    pub fn for_addr(addr: SocketAddr, ty: i32) -> io::Result<Self> {
        if addr.is_ipv4() {
            Self::new_v4(ty)
        } else {
            Self::new_v6(ty)
        }
    }

    fn new(domain: i32, ty: i32) -> io::Result<Self> {
        ensure_winsock();
        let raw = unsafe { socket(domain, ty, IPPROTO_TCP as i32) };
        if raw == INVALID_SOCKET as u64 {
            return Err(last_wsa_error());
        }
        Ok(Socket { raw })
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        let storage = SockAddrStorage::from(addr);
        let rc = unsafe { bind(self.raw, storage.as_ptr(), storage.len()) };
        if rc != 0 {
            return Err(last_wsa_error());
        }
        Ok(())
    }

    pub fn listen(&self, backlog: u32) -> io::Result<()> {
        let rc = unsafe { listen(self.raw, backlog as i32) };
        if rc != 0 {
            return Err(last_wsa_error());
        }
        Ok(())
    }

    pub fn set_reuseaddr(&self, enable: bool) -> io::Result<()> {
        let val: i32 = enable as i32;
        let rc = unsafe {
            setsockopt(
                self.raw,
                SOL_SOCKET as i32,
                SO_REUSEADDR as i32,
                &val as *const _ as *const u8,
                mem::size_of_val(&val) as i32,
            )
        };
        if rc != 0 {
            return Err(last_wsa_error());
        }
        Ok(())
    }

    pub fn set_nodelay(&self, enable: bool) -> io::Result<()> {
        let val: i32 = enable as i32;
        let rc = unsafe {
            setsockopt(
                self.raw,
                IPPROTO_TCP as i32,
                TCP_NODELAY as i32,
                &val as *const _ as *const u8,
                mem::size_of_val(&val) as i32,
            )
        };
        if rc != 0 {
            return Err(last_wsa_error());
        }
        Ok(())
    }

    /// All reactor-owned sockets are associated with an I/O completion port
    /// and driven exclusively through overlapped calls; blocking mode is
    /// never meaningful for them. Kept for interface parity with spec §6's
    /// `setNonBlocking(true)` — a `false` argument is rejected.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        if !nonblocking {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "proactor sockets are always non-blocking",
            ));
        }
        let mut mode: u32 = 1;
        let rc = unsafe { ioctlsocket(self.raw, FIONBIO, &mut mode) };
        if rc != 0 {
            return Err(last_wsa_error());
        }
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
        let rc = unsafe { getsockname(self.raw, &mut storage as *mut _ as *mut SOCKADDR, &mut len) };
        if rc != 0 {
            return Err(last_wsa_error());
        }
        from_sockaddr(&storage)
    }

    pub fn as_raw(&self) -> RawSocket {
        self.raw
    }

    /// Takes ownership of an already-open socket handle (used to hand the
    /// `AcceptEx`-populated socket from `op::Payload::Accept` to the caller).
    pub unsafe fn from_raw(raw: RawSocket) -> Self {
        Socket { raw }
    }

    pub fn into_raw(self) -> RawSocket {
        let raw = self.raw;
        mem::forget(self);
        raw
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            closesocket(self.raw);
        }
    }
}

fn last_wsa_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

/// Decrements the Winsock usage count. Not currently called: the process is
/// expected to keep sockets alive for its whole lifetime, matching the
/// C++ original's own choice never to call the matching `WSACleanup` outside
/// of static teardown.
#[allow(dead_code)]
fn shutdown_winsock() {
    unsafe {
        WSACleanup();
    }
}

/// An owned, fixed-size `SOCKADDR_IN`/`SOCKADDR_IN6` encoding of a
/// `SocketAddr`. Connect operations store one of these inline in their
/// [`crate::op::OperationRecord`] payload so the pointer handed to
/// `ConnectEx` stays valid from submission to completion.
#[derive(Clone, Copy)]
pub struct SockAddrStorage {
    storage: SOCKADDR_STORAGE,
    len: i32,
}

impl SockAddrStorage {
    pub fn as_ptr(&self) -> *const SOCKADDR {
        &self.storage as *const _ as *const SOCKADDR
    }

    pub fn as_mut_ptr(&mut self) -> *mut SOCKADDR {
        &mut self.storage as *mut _ as *mut SOCKADDR
    }

    pub fn len(&self) -> i32 {
        self.len
    }

    pub fn to_socket_addr(&self) -> io::Result<SocketAddr> {
        from_sockaddr(&self.storage)
    }
}

impl From<SocketAddr> for SockAddrStorage {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => {
                let mut raw: SOCKADDR_IN = unsafe { mem::zeroed() };
                raw.sin_family = AF_INET;
                raw.sin_port = v4.port().to_be();
                raw.sin_addr.S_un.S_addr = u32::from_ne_bytes(v4.ip().octets());
                let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        &raw as *const _ as *const u8,
                        &mut storage as *mut _ as *mut u8,
                        mem::size_of::<SOCKADDR_IN>(),
                    );
                }
                SockAddrStorage {
                    storage,
                    len: mem::size_of::<SOCKADDR_IN>() as i32,
                }
            }
            SocketAddr::V6(v6) => {
                let mut raw: SOCKADDR_IN6 = unsafe { mem::zeroed() };
                raw.sin6_family = AF_INET6;
                raw.sin6_port = v6.port().to_be();
                raw.sin6_addr.u.Byte = v6.ip().octets();
                let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        &raw as *const _ as *const u8,
                        &mut storage as *mut _ as *mut u8,
                        mem::size_of::<SOCKADDR_IN6>(),
                    );
                }
                SockAddrStorage {
                    storage,
                    len: mem::size_of::<SOCKADDR_IN6>() as i32,
                }
            }
        }
    }
}

fn from_sockaddr(storage: &SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    match storage.ss_family {
        AF_INET => {
            let addr: &SOCKADDR_IN = unsafe { &*(storage as *const _ as *const SOCKADDR_IN) };
            let ip = std::net::Ipv4Addr::from(unsafe { addr.sin_addr.S_un.S_addr }.to_ne_bytes());
            Ok(SocketAddr::new(ip.into(), u16::from_be(addr.sin_port)))
        }
        AF_INET6 => {
            let addr: &SOCKADDR_IN6 = unsafe { &*(storage as *const _ as *const SOCKADDR_IN6) };
            let ip = std::net::Ipv6Addr::from(unsafe { addr.sin6_addr.u.Byte });
            Ok(SocketAddr::new(ip.into(), u16::from_be(addr.sin6_port)))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {family}"),
        )),
    }
}

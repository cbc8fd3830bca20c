//! Windows completion backend built directly on I/O completion ports.
//!
//! `AcceptEx`/`ConnectEx` are Winsock extension functions resolved once per
//! process via `WSAIoctl(SIO_GET_EXTENSION_FUNCTION_POINTER)` — the same
//! dance `miow` (mio's historical Windows layer) performs, since neither
//! function is guaranteed statically linkable the way `WSARecv`/`WSASend`
//! are. Grounded on the C++ original's `ReactorIocp` (`reactor_iocp.hpp`/
//! `reactor_iocp.cpp`): one completion port, one worker thread draining
//! `GetQueuedCompletionStatus`, a null-`OVERLAPPED` post as the stop
//! sentinel, `CancelIoEx` to abort in-flight operations on shutdown.
//!
//! The original recovers its operation struct from a raw `OVERLAPPED*` via
//! `CONTAINING_RECORD`. Rust has no portable equivalent of that macro, so
//! instead [`Overlapped`] puts the `OVERLAPPED` as its first `#[repr(C)]`
//! field: the pointer IOCP hands back on completion already *is* a valid
//! `*mut Overlapped`, no offset arithmetic required.

use std::io;
use std::os::windows::io::RawHandle;
use std::sync::OnceLock;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::{
    WSAIoctl, LPFN_ACCEPTEX, LPFN_CONNECTEX, SIO_GET_EXTENSION_FUNCTION_POINTER, SOCKADDR, WSABUF,
    WSAID_ACCEPTEX, WSAID_CONNECTEX,
};
use windows_sys::Win32::System::IO::{
    CancelIoEx, CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
    PostQueuedCompletionStatus,
};

use crate::op::OpIndex;
use crate::sys::windows::socket::RawSocket;

static ACCEPT_EX: OnceLock<LPFN_ACCEPTEX> = OnceLock::new();
static CONNECT_EX: OnceLock<LPFN_CONNECTEX> = OnceLock::new();

/// Extra room `AcceptEx` needs past each address: 16 bytes per Microsoft's
/// documented "at least sizeof(sockaddr) + 16" requirement.
const ADDR_PAD: usize = 16;
const ADDR_SLOT: usize = std::mem::size_of::<windows_sys::Win32::Networking::WinSock::SOCKADDR_STORAGE>() + ADDR_PAD;

#[repr(C)]
struct Overlapped {
    raw: OVERLAPPED,
    index: OpIndex,
    /// Scratch output buffer for `AcceptEx`'s local+remote address pair.
    /// Unused by recv/send/connect but kept inline so one struct shape
    /// covers every operation kind.
    accept_addrs: [u8; ADDR_SLOT * 2],
}

impl Overlapped {
    fn boxed(index: OpIndex) -> Box<Self> {
        Box::new(Overlapped {
            raw: unsafe { std::mem::zeroed() },
            index,
            accept_addrs: [0u8; ADDR_SLOT * 2],
        })
    }
}

fn load_extension<T>(socket: RawSocket, guid: windows_sys::core::GUID) -> io::Result<T> {
    let mut fn_ptr: usize = 0;
    let mut bytes_returned: u32 = 0;
    let rc = unsafe {
        WSAIoctl(
            socket,
            SIO_GET_EXTENSION_FUNCTION_POINTER,
            &guid as *const _ as *const core::ffi::c_void,
            std::mem::size_of_val(&guid) as u32,
            &mut fn_ptr as *mut _ as *mut core::ffi::c_void,
            std::mem::size_of::<usize>() as u32,
            &mut bytes_returned,
            std::ptr::null_mut(),
            None,
        )
    };
    if rc != 0 {
        return Err(super::last_os_error());
    }
    Ok(unsafe { std::mem::transmute_copy::<usize, T>(&fn_ptr) })
}

fn accept_ex(socket: RawSocket) -> io::Result<LPFN_ACCEPTEX> {
    ACCEPT_EX
        .get_or_init(|| load_extension(socket, WSAID_ACCEPTEX).ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "AcceptEx unavailable"))
        .map(Some)
}

fn connect_ex(socket: RawSocket) -> io::Result<LPFN_CONNECTEX> {
    CONNECT_EX
        .get_or_init(|| load_extension(socket, WSAID_CONNECTEX).ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "ConnectEx unavailable"))
        .map(Some)
}

pub struct IocpBackend {
    port: HANDLE,
}

unsafe impl Send for IocpBackend {}
unsafe impl Sync for IocpBackend {}

impl IocpBackend {
    pub fn new() -> io::Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(super::last_os_error());
        }
        Ok(IocpBackend { port })
    }

    /// Associates `socket` with this backend's completion port. Every
    /// socket the reactor submits an operation for must go through this
    /// exactly once before its first overlapped call — mirrors the C++
    /// original associating each accepted/connecting socket with the IOCP
    /// handle as soon as it's created.
    pub fn associate(&self, socket: RawSocket) -> io::Result<()> {
        let handle = socket as HANDLE;
        let result = unsafe { CreateIoCompletionPort(handle, self.port, socket as usize, 0) };
        if result == 0 {
            return Err(super::last_os_error());
        }
        Ok(())
    }

    pub fn submit_accept(
        &self,
        index: OpIndex,
        listener: RawSocket,
        accepted_socket: RawSocket,
    ) -> io::Result<()> {
        let accept_ex = accept_ex(listener)?.expect("checked Some above");
        let mut overlapped = Overlapped::boxed(index);
        let mut bytes_received: u32 = 0;
        let ok = unsafe {
            accept_ex(
                listener,
                accepted_socket,
                overlapped.accept_addrs.as_mut_ptr() as *mut core::ffi::c_void,
                0,
                ADDR_SLOT as u32,
                ADDR_SLOT as u32,
                &mut bytes_received,
                &mut overlapped.raw,
            )
        };
        let overlapped_ptr = Box::into_raw(overlapped);
        if ok == 0 {
            let err = super::last_os_error();
            const ERROR_IO_PENDING: i32 = 997;
            if err.raw_os_error() != Some(ERROR_IO_PENDING) {
                unsafe {
                    drop(Box::from_raw(overlapped_ptr));
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn submit_recv(&self, index: OpIndex, socket: RawSocket, buf: &mut [u8]) -> io::Result<()> {
        let overlapped = Overlapped::boxed(index);
        let mut wsabuf = WSABUF {
            len: buf.len() as u32,
            buf: buf.as_mut_ptr(),
        };
        let overlapped_ptr = Box::into_raw(overlapped);
        let mut flags: u32 = 0;
        let rc = unsafe {
            windows_sys::Win32::Networking::WinSock::WSARecv(
                socket,
                &mut wsabuf,
                1,
                std::ptr::null_mut(),
                &mut flags,
                overlapped_ptr as *mut OVERLAPPED,
                None,
            )
        };
        self.check_pending(rc, overlapped_ptr)
    }

    pub fn submit_send(&self, index: OpIndex, socket: RawSocket, buf: &[u8]) -> io::Result<()> {
        let overlapped = Overlapped::boxed(index);
        let mut wsabuf = WSABUF {
            len: buf.len() as u32,
            buf: buf.as_ptr() as *mut u8,
        };
        let overlapped_ptr = Box::into_raw(overlapped);
        let rc = unsafe {
            windows_sys::Win32::Networking::WinSock::WSASend(
                socket,
                &mut wsabuf,
                1,
                std::ptr::null_mut(),
                0,
                overlapped_ptr as *mut OVERLAPPED,
                None,
            )
        };
        self.check_pending(rc, overlapped_ptr)
    }

    pub fn submit_connect(
        &self,
        index: OpIndex,
        socket: RawSocket,
        addr_ptr: *const SOCKADDR,
        addr_len: i32,
    ) -> io::Result<()> {
        let connect_ex = connect_ex(socket)?.expect("checked Some above");
        let overlapped = Overlapped::boxed(index);
        let overlapped_ptr = Box::into_raw(overlapped);
        let mut bytes_sent: u32 = 0;
        let ok = unsafe {
            connect_ex(
                socket,
                addr_ptr,
                addr_len,
                std::ptr::null(),
                0,
                &mut bytes_sent,
                overlapped_ptr as *mut OVERLAPPED,
            )
        };
        self.check_pending(ok, overlapped_ptr)
    }

    fn check_pending(&self, rc: i32, overlapped_ptr: *mut Overlapped) -> io::Result<()> {
        if rc != 0 {
            return Ok(());
        }
        let err = super::last_os_error();
        const ERROR_IO_PENDING: i32 = 997;
        if err.raw_os_error() == Some(ERROR_IO_PENDING) {
            return Ok(());
        }
        unsafe {
            drop(Box::from_raw(overlapped_ptr));
        }
        Err(err)
    }

    pub fn cancel(&self, _index: OpIndex) {
        // No per-operation handle is retained once submitted — `CancelIoEx`
        // needs the socket, which the reactor already has via the record's
        // payload, so cancellation is issued from `Reactor::stop` itself
        // rather than here. This hook exists for trait-shape parity with
        // the Linux backend.
    }

    /// Cancels every pending overlapped operation on `socket`.
    pub fn cancel_socket(&self, socket: RawSocket) {
        unsafe {
            CancelIoEx(socket as HANDLE, std::ptr::null());
        }
    }

    pub fn drain(&self, timeout: Duration) -> Vec<(OpIndex, i64)> {
        let mut bytes_transferred: u32 = 0;
        let mut completion_key: usize = 0;
        let mut overlapped_ptr: *mut OVERLAPPED = std::ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(
                self.port,
                &mut bytes_transferred,
                &mut completion_key,
                &mut overlapped_ptr,
                timeout.as_millis().min(u32::MAX as u128) as u32,
            )
        };
        if overlapped_ptr.is_null() {
            // Either the wait timed out (nothing to report) or this is our
            // own stop sentinel posted by `wake()` — both resolve to "no
            // completions this pass".
            return Vec::new();
        }
        let overlapped = unsafe { Box::from_raw(overlapped_ptr as *mut Overlapped) };
        let result = if ok != 0 {
            bytes_transferred as i64
        } else {
            -(super::last_os_error().raw_os_error().unwrap_or(-1) as i64)
        };
        vec![(overlapped.index, result)]
    }

    /// Unblocks a thread parked in `drain` by posting a completion with a
    /// null `OVERLAPPED`, the same stop signal the C++ original's
    /// `ReactorIocp::stop` posts.
    pub fn wake(&self) {
        unsafe {
            PostQueuedCompletionStatus(self.port, 0, 0, std::ptr::null_mut());
        }
    }
}

impl Drop for IocpBackend {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}

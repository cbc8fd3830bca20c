pub(crate) mod iocp;
pub(crate) mod socket;

use std::io;
use windows_sys::Win32::Foundation::GetLastError;

/// The last Win32 error observed on this thread, as an [`io::Error`].
pub fn last_os_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { GetLastError() } as i32)
}

//! Windows contract: open a process handle once in `for_pid` and reuse it
//! for every subsequent `ReadProcessMemory` call, rather than reopening a
//! handle per chunk. Grounded on the handle-reuse pattern in this crate's
//! original Windows dumper, which keeps one process handle alive for the
//! lifetime of a dump.

use super::RegionReader;
use crate::errors::ReadError;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows_sys::Win32::System::Threading::{
    OpenProcess, PROCESS_VM_READ,
};

pub struct WindowsRegionReader {
    pid: u32,
    handle: isize,
}

impl RegionReader for WindowsRegionReader {
    fn for_pid(pid: u32) -> Result<Self, ReadError> {
        // SAFETY: FFI call with no preconditions beyond a valid pid.
        let handle = unsafe { OpenProcess(PROCESS_VM_READ, 0, pid) };
        if handle == 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(5) => ReadError::Denied(pid),
                Some(87) => ReadError::Vanished(pid),
                _ => ReadError::Unreadable,
            });
        }
        Ok(WindowsRegionReader { pid, handle })
    }

    fn read_chunk(&mut self, address: u64, length: usize) -> Result<Vec<u8>, ReadError> {
        let mut buf = vec![0u8; length];
        let mut read: usize = 0;
        // SAFETY: handle was opened with PROCESS_VM_READ above, buf is
        // sized for `length` bytes, and `read` receives the actual count.
        let ok = unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const _,
                buf.as_mut_ptr() as *mut _,
                length,
                &mut read,
            )
        };
        if ok == 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(5) => ReadError::Denied(self.pid),
                Some(299) => {
                    // ERROR_PARTIAL_COPY: part of the region was unmapped
                    // mid-read. Return what we got rather than failing
                    // the whole chunk.
                    buf.truncate(read);
                    return Ok(buf);
                }
                _ => ReadError::Unreadable,
            });
        }
        buf.truncate(read);
        Ok(buf)
    }
}

impl Drop for WindowsRegionReader {
    fn drop(&mut self) {
        // SAFETY: handle was returned by a successful OpenProcess.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

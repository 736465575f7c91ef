//! Windows contract: walk the virtual address space with repeated
//! `VirtualQueryEx` calls, advancing the cursor by each region's reported
//! size. Grounded on the `MemoryRegionIterator`/`VirtualQueryEx` loop used
//! for memory scanning on this platform.

use super::RegionEnumerator;
use crate::errors::RegionEnumerationError;
use crate::model::Region;
use std::mem::MaybeUninit;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Memory::{
    VirtualQueryEx, MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE_READ,
    PAGE_EXECUTE_READWRITE, PAGE_GUARD, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

#[cfg(target_pointer_width = "64")]
const USER_SPACE_LIMIT: u64 = 0x7FFF_FFFF_0000;
#[cfg(target_pointer_width = "32")]
const USER_SPACE_LIMIT: u64 = 0x7FFF_0000;

pub struct WindowsRegionEnumerator;

impl RegionEnumerator for WindowsRegionEnumerator {
    fn enumerate(pid: u32) -> Result<Vec<Region>, RegionEnumerationError> {
        // SAFETY: OpenProcess is an FFI call with no preconditions beyond a
        // valid pid; failure is reported through GetLastError and mapped below.
        let handle = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid) };
        if handle == 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(5) => RegionEnumerationError::Denied(pid), // ERROR_ACCESS_DENIED
                Some(87) => RegionEnumerationError::Vanished(pid), // ERROR_INVALID_PARAMETER: pid gone
                _ => RegionEnumerationError::NotAccessible(pid),
            });
        }

        let mut regions = Vec::new();
        let mut cursor: u64 = 0;

        while cursor < USER_SPACE_LIMIT {
            let mut mbi = MaybeUninit::<MEMORY_BASIC_INFORMATION>::uninit();
            // SAFETY: mbi is a valid, correctly sized out-buffer.
            let written = unsafe {
                VirtualQueryEx(
                    handle,
                    cursor as *const _,
                    mbi.as_mut_ptr(),
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 {
                break;
            }
            // SAFETY: VirtualQueryEx reported success above.
            let mbi = unsafe { mbi.assume_init() };
            let region_base = mbi.BaseAddress as u64;
            let region_size = mbi.RegionSize as u64;
            let next = region_base.saturating_add(region_size);

            if next <= cursor {
                break; // guard against an unexpected non-advancing region
            }
            cursor = next;

            if is_readable(&mbi) {
                regions.push(Region {
                    start: region_base,
                    end: region_base + region_size,
                    readable: true,
                });
            }
        }

        // SAFETY: handle was returned by a successful OpenProcess above.
        unsafe {
            CloseHandle(handle);
        }

        Ok(regions)
    }
}

fn is_readable(mbi: &MEMORY_BASIC_INFORMATION) -> bool {
    if mbi.State != MEM_COMMIT {
        return false;
    }
    if mbi.Protect & PAGE_GUARD != 0 || mbi.Protect == PAGE_NOACCESS {
        return false;
    }
    matches!(
        mbi.Protect,
        PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_READWRITE | PAGE_READONLY
    )
}

//! §4.2 `RegionReader`: reads bytes of a target process's memory a chunk
//! at a time. Platform contracts live in the `linux`/`windows`/`macos`
//! submodules; this module only defines the shared trait.

use crate::errors::ReadError;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        pub use linux::LinuxRegionReader as PlatformRegionReader;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        pub use windows::WindowsRegionReader as PlatformRegionReader;
    } else {
        mod macos;
        pub use macos::MacosRegionReader as PlatformRegionReader;
    }
}

/// Reads one chunk of a process's memory. Implementations are constructed
/// per-PID so a platform handle (e.g. a Windows `HANDLE`) can be opened
/// once and reused across every chunk read for that process.
pub trait RegionReader: Sized {
    fn for_pid(pid: u32) -> Result<Self, ReadError>;
    fn read_chunk(&mut self, address: u64, length: usize) -> Result<Vec<u8>, ReadError>;
}

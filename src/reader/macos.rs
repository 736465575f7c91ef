//! macOS: paired with `MacosRegionEnumerator`'s empty region list, every
//! read is unreachable in practice; this exists so `Collector` can stay
//! platform-generic rather than `cfg`-gating the reader type directly.

use super::RegionReader;
use crate::errors::ReadError;

pub struct MacosRegionReader;

impl RegionReader for MacosRegionReader {
    fn for_pid(_pid: u32) -> Result<Self, ReadError> {
        Ok(MacosRegionReader)
    }

    fn read_chunk(&mut self, _address: u64, _length: usize) -> Result<Vec<u8>, ReadError> {
        Err(ReadError::Unreadable)
    }
}

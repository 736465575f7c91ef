//! macOS: the hard-core memory subsystem targets Linux and Windows only
//! (see SPEC_FULL.md §4.1). Returning an empty region list here means
//! `ProcessDumper`'s existing "regions is empty: skip P" rule applies
//! uniformly instead of a third ptrace/mach-specific code path being
//! invented for a platform the spec never asked for memory support on.

use super::RegionEnumerator;
use crate::errors::RegionEnumerationError;
use crate::model::Region;

pub struct MacosRegionEnumerator;

impl RegionEnumerator for MacosRegionEnumerator {
    fn enumerate(_pid: u32) -> Result<Vec<Region>, RegionEnumerationError> {
        Ok(Vec::new())
    }
}

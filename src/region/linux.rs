//! Linux contract: parse `/proc/<pid>/maps`. A region is included iff
//! character 0 of the permissions field is `r`. Grounded on the upstream
//! `procfs_core`-based maps reading in `ptrace_dumper.rs::enumerate_mappings`,
//! simplified to the single `{start,end,readable}` shape this system needs.

use super::RegionEnumerator;
use crate::errors::RegionEnumerationError;
use crate::model::Region;
use std::fs;
use std::io::ErrorKind;

pub struct LinuxRegionEnumerator;

impl RegionEnumerator for LinuxRegionEnumerator {
    fn enumerate(pid: u32) -> Result<Vec<Region>, RegionEnumerationError> {
        let path = format!("/proc/{pid}/maps");
        let contents = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RegionEnumerationError::Vanished(pid),
            ErrorKind::PermissionDenied => RegionEnumerationError::Denied(pid),
            _ => RegionEnumerationError::NotAccessible(pid),
        })?;

        let mut regions = Vec::new();
        for line in contents.lines() {
            if line.is_empty() {
                continue;
            }
            if let Some(region) = parse_maps_line(line) {
                regions.push(region);
            }
        }
        Ok(regions)
    }
}

fn parse_maps_line(line: &str) -> Option<Region> {
    let (addr_range, rest) = line.split_once(' ')?;
    let (start_hex, end_hex) = addr_range.split_once('-')?;
    let perms = rest.get(0..4)?;
    let readable = perms.as_bytes().first() == Some(&b'r');

    let start = u64::from_str_radix(start_hex, 16).ok()?;
    let end = u64::from_str_radix(end_hex, 16).ok()?;
    if start >= end {
        return None;
    }
    if !readable {
        return None;
    }
    Some(Region { start, end, readable })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_readable_region() {
        let line = "00400000-00401000 r-xp 00000000 08:01 1234567 /bin/cat";
        let region = parse_maps_line(line).unwrap();
        assert_eq!(region.start, 0x00400000);
        assert_eq!(region.end, 0x00401000);
        assert!(region.readable);
    }

    #[test]
    fn skips_unreadable_region() {
        let line = "7fff00000000-7fff00001000 ---p 00000000 00:00 0";
        assert!(parse_maps_line(line).is_none());
    }

    #[test]
    fn enumerate_self_returns_sorted_nonoverlapping_regions() {
        let pid = std::process::id();
        let regions = LinuxRegionEnumerator::enumerate(pid).unwrap();
        assert!(!regions.is_empty());
        super::super::assert_sorted_nonoverlapping(&regions);
    }
}

//! Linux enrichment for §4.8: open/mapped files via `/proc/<pid>/fd` and
//! `/proc/<pid>/maps` (the same primitives `region::linux` already reads),
//! and `/proc/net/{tcp,tcp6,udp,udp6}` joined to PIDs via socket inode
//! links, avoiding a second OS-specific handle-walking backend.

use super::NetworkConnection;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use sysinfo::{Pid, System};

pub fn open_and_mapped_files(pid: u32) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut open_files = BTreeSet::new();
    if let Ok(entries) = fs::read_dir(format!("/proc/{pid}/fd")) {
        for entry in entries.flatten() {
            if let Ok(target) = fs::read_link(entry.path()) {
                let target = target.to_string_lossy();
                if target.starts_with('/') {
                    open_files.insert(target.into_owned());
                }
            }
        }
    }

    let mut mapped_files = BTreeSet::new();
    if let Ok(maps) = fs::read_to_string(format!("/proc/{pid}/maps")) {
        for line in maps.lines() {
            if let Some(path) = line.split_whitespace().last() {
                if path.starts_with('/') {
                    mapped_files.insert(path.to_string());
                }
            }
        }
    }

    (open_files, mapped_files)
}

/// One parsed row of `/proc/net/{tcp,tcp6,udp,udp6}`, resolved to the PID
/// that owns the socket inode (if any open fd in `/proc/*/fd` points at it).
struct RawConnection {
    pid: Option<u32>,
    laddr: String,
    lport: u16,
    raddr: String,
    rport: u16,
}

fn parse_proc_net() -> Vec<RawConnection> {
    let inode_to_pid = build_inode_to_pid();
    let mut out = Vec::new();
    for (path, is_v6) in [
        ("/proc/net/tcp", false),
        ("/proc/net/tcp6", true),
        ("/proc/net/udp", false),
        ("/proc/net/udp6", true),
    ] {
        let Ok(contents) = fs::read_to_string(path) else { continue };
        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            let (laddr, lport) = match parse_endpoint(fields[1], is_v6) {
                Some(e) => e,
                None => continue,
            };
            let (raddr, rport) = parse_endpoint(fields[2], is_v6).unwrap_or(("0.0.0.0".to_string(), 0));
            let inode: u64 = fields[9].parse().unwrap_or(0);
            out.push(RawConnection {
                pid: inode_to_pid.get(&inode).copied(),
                laddr,
                lport,
                raddr,
                rport,
            });
        }
    }
    out
}

pub fn network_connections(system: &System) -> Vec<NetworkConnection> {
    parse_proc_net()
        .into_iter()
        .map(|c| {
            let proc_name = c
                .pid
                .and_then(|pid| system.process(Pid::from_u32(pid)))
                .map(|p| p.name().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            NetworkConnection {
                laddr: c.laddr,
                lport: c.lport,
                raddr: c.raddr,
                rport: c.rport,
                proc_name,
            }
        })
        .collect()
}

/// Per-process connection summaries for `ProcessRecord.connections`: one
/// log line per established connection (both a local and a remote address
/// present, i.e. not a listening socket), grouped by owning PID.
pub fn connections_by_pid() -> HashMap<u32, Vec<String>> {
    let mut map: HashMap<u32, Vec<String>> = HashMap::new();
    let now = chrono::Utc::now().timestamp();
    for c in parse_proc_net() {
        let Some(pid) = c.pid else { continue };
        if c.rport == 0 {
            continue;
        }
        let line = format!("{now} {} {} {} {}", c.laddr, c.lport, c.raddr, c.rport);
        map.entry(pid).or_default().push(line);
    }
    map
}

fn build_inode_to_pid() -> HashMap<u64, u32> {
    let mut map = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else { return map };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else { continue };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else { continue };
        for fd in fds.flatten() {
            if let Ok(target) = fs::read_link(fd.path()) {
                let target = target.to_string_lossy();
                if let Some(inode) = target.strip_prefix("socket:[").and_then(|s| s.strip_suffix(']')) {
                    if let Ok(inode) = inode.parse() {
                        map.insert(inode, pid);
                    }
                }
            }
        }
    }
    map
}

fn parse_endpoint(field: &str, is_v6: bool) -> Option<(String, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let addr = if is_v6 {
        parse_ipv6(addr_hex)?.to_string()
    } else {
        parse_ipv4(addr_hex)?.to_string()
    };
    Some((addr, port))
}

fn hex_byte(hex: &str, i: usize) -> Option<u8> {
    u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()
}

fn parse_ipv4(hex: &str) -> Option<Ipv4Addr> {
    if hex.len() != 8 {
        return None;
    }
    Some(Ipv4Addr::new(
        hex_byte(hex, 6)?,
        hex_byte(hex, 4)?,
        hex_byte(hex, 2)?,
        hex_byte(hex, 0)?,
    ))
}

fn parse_ipv6(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 {
        return None;
    }
    let mut groups = [0u16; 8];
    for w in 0..4 {
        let word = hex.get(w * 8..w * 8 + 8)?;
        let bytes = [
            hex_byte(word, 6)?,
            hex_byte(word, 4)?,
            hex_byte(word, 2)?,
            hex_byte(word, 0)?,
        ];
        groups[w * 2] = u16::from_be_bytes([bytes[0], bytes[1]]);
        groups[w * 2 + 1] = u16::from_be_bytes([bytes[2], bytes[3]]);
    }
    Some(Ipv6Addr::new(
        groups[0], groups[1], groups[2], groups[3], groups[4], groups[5], groups[6], groups[7],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipv4_localhost() {
        assert_eq!(parse_ipv4("0100007F").unwrap(), Ipv4Addr::new(127, 0, 0, 1));
    }

    #[test]
    fn parse_endpoint_zero_is_any() {
        let (addr, port) = parse_endpoint("00000000:0000", false).unwrap();
        assert_eq!(addr, "0.0.0.0");
        assert_eq!(port, 0);
    }
}

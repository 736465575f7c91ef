//! Non-Linux fallback: `sysinfo` does not expose open/mapped files or raw
//! socket tables portably, and adding a second per-OS handle-walking
//! backend is out of scope for an "injected collaborator" role (§4.8).

use super::NetworkConnection;
use std::collections::{BTreeSet, HashMap};
use sysinfo::System;

pub fn open_and_mapped_files(_pid: u32) -> (BTreeSet<String>, BTreeSet<String>) {
    (BTreeSet::new(), BTreeSet::new())
}

pub fn network_connections(_system: &System) -> Vec<NetworkConnection> {
    log::info!("network inventory is Linux-only; returning an empty connection list");
    Vec::new()
}

pub fn connections_by_pid() -> HashMap<u32, Vec<String>> {
    HashMap::new()
}

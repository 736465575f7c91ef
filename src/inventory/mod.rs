//! §4.8 `HostIntrospector`: concrete process/network/open-file inventory.
//! `sysinfo` supplies the cross-platform process fields everywhere; Linux
//! is further enriched with the same `/proc` primitives `RegionEnumerator`
//! already reads, so no new OS surface is introduced for inventory alone.

use crate::model::ProcessRecord;
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;
use sysinfo::System;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        use linux as platform;
    } else {
        mod other;
        use other as platform;
    }
}

/// Which processes a collection run is restricted to. Enforced inside the
/// introspector, matching the original's `get_processes_dict` placement
/// rather than filtering after the fact in the collector.
#[derive(Debug, Clone)]
pub enum ProcessFilter {
    All,
    ByName(String),
    ByPid(u32),
}

/// One row of `netstat.log`, before the collector prefixes it with a
/// timestamp and writes it out.
#[derive(Debug, Clone)]
pub struct NetworkConnection {
    pub laddr: String,
    pub lport: u16,
    pub raddr: String,
    pub rport: u16,
    pub proc_name: String,
}

impl NetworkConnection {
    pub fn to_log_line(&self, at: chrono::DateTime<Utc>) -> String {
        format!(
            "{} {} {} {} {} {}",
            at.format("%Y-%m-%d %H:%M:%S"),
            self.laddr,
            self.lport,
            self.raddr,
            self.rport,
            self.proc_name,
        )
    }
}

pub trait HostIntrospector {
    fn get_processes(&self, filter: &ProcessFilter) -> Vec<ProcessRecord>;
    fn get_network(&self) -> Vec<NetworkConnection>;
    fn dump_loaded_files(&self, processes: &[ProcessRecord]) -> Vec<String>;
}

pub struct SysinfoIntrospector {
    system: System,
}

impl SysinfoIntrospector {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        SysinfoIntrospector { system }
    }
}

impl Default for SysinfoIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostIntrospector for SysinfoIntrospector {
    fn get_processes(&self, filter: &ProcessFilter) -> Vec<ProcessRecord> {
        let mut records = Vec::new();
        let connections_by_pid = platform::connections_by_pid();
        for (pid, process) in self.system.processes() {
            let pid_u32 = pid.as_u32();
            let name = process.name().to_string_lossy().into_owned();
            match filter {
                ProcessFilter::ByName(wanted) => {
                    if &name != wanted {
                        continue;
                    }
                }
                ProcessFilter::ByPid(wanted) => {
                    if pid_u32 != *wanted {
                        continue;
                    }
                }
                ProcessFilter::All => {}
            }

            let (open_files, mapped_files) = platform::open_and_mapped_files(pid_u32);
            let creation_time = Utc
                .timestamp_opt(process.start_time() as i64, 0)
                .single()
                .unwrap_or_else(Utc::now)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string();
            let command_line: Vec<String> = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();

            records.push(ProcessRecord {
                pid: pid_u32,
                name,
                exe_path: process.exe().map(|p| p.to_string_lossy().into_owned()),
                parent_pid: process.parent().map(|p| p.as_u32()),
                status: process.status().to_string(),
                user: process.user_id().map(|uid| uid.to_string()),
                command_line: command_line.join(" "),
                creation_time,
                open_files,
                mapped_files,
                connections: connections_by_pid.get(&pid_u32).cloned().unwrap_or_default(),
            });
        }
        records
    }

    fn get_network(&self) -> Vec<NetworkConnection> {
        platform::network_connections(&self.system)
    }

    fn dump_loaded_files(&self, processes: &[ProcessRecord]) -> Vec<String> {
        let mut files: BTreeSet<String> = BTreeSet::new();
        for proc in processes {
            files.extend(proc.open_files.iter().cloned());
            files.extend(proc.mapped_files.iter().cloned());
            if let Some(exe) = &proc.exe_path {
                files.insert(exe.clone());
            }
        }
        files
            .into_iter()
            .filter(|path| {
                std::fs::metadata(path)
                    .map(|meta| meta.len() > 0)
                    .unwrap_or(false)
            })
            .collect()
    }
}

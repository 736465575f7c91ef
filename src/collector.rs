//! §4.5 `Collector`: the top-level driver. Sequences inventory capture,
//! screenshot, open-file copy, scanning, dumping and carving, writing
//! everything into one [`crate::archive::ArchiveSink`].

use crate::archive::{self, ArchiveSink};
use crate::carver::Carver;
use crate::config::CollectorConfig;
use crate::dumper::ProcessDumper;
use crate::errors::StartupError;
use crate::inventory::{HostIntrospector, NetworkConnection, SysinfoIntrospector};
use crate::model::{json_table, ProcessRecord};
use crate::reader::{PlatformRegionReader, RegionReader};
use crate::region::{PlatformRegionEnumerator, RegionEnumerator};
use crate::scan::ScanGate;
use crate::string_manips::{remove_special_characters, strip_drive};
use chrono::Utc;
use std::marker::PhantomData;
use std::path::Path;

/// Generic over the introspector/enumerator/reader seams so the
/// orchestration in `run` can be exercised against stand-ins in tests, the
/// way `ProcessDumper`/`ScanGate` already separate platform I/O from
/// sequencing. `Collector::new` picks the real platform implementations.
pub struct Collector<I = SysinfoIntrospector, E = PlatformRegionEnumerator, R = PlatformRegionReader> {
    config: CollectorConfig,
    introspector: I,
    _enumerator: PhantomData<E>,
    _reader: PhantomData<R>,
}

impl Collector<SysinfoIntrospector, PlatformRegionEnumerator, PlatformRegionReader> {
    pub fn new(config: CollectorConfig) -> Self {
        Collector {
            config,
            introspector: SysinfoIntrospector::new(),
            _enumerator: PhantomData,
            _reader: PhantomData,
        }
    }
}

impl<I, E, R> Collector<I, E, R>
where
    I: HostIntrospector,
    E: RegionEnumerator,
    R: RegionReader,
{
    #[cfg(test)]
    fn with_introspector(config: CollectorConfig, introspector: I) -> Self {
        Collector {
            config,
            introspector,
            _enumerator: PhantomData,
            _reader: PhantomData,
        }
    }

    pub fn run(&self) -> Result<(), StartupError> {
        let introspector = &self.introspector;
        let mut sink = archive::open_sink(&self.config.output_path)
            .map_err(StartupError::ArchiveError)?;

        let processes = introspector.get_processes(&self.config.process_filter);
        self.write_inventory(introspector, &processes, sink.as_mut())
            .map_err(StartupError::ArchiveError)?;

        if self.config.take_screenshot {
            if let Some(png) = crate::screenshot::capture() {
                let name = format!("{}-{}.png", machine_name(), Utc::now().timestamp());
                if let Err(e) = sink.put_bytes(&name, &png) {
                    log::warn!("failed to append screenshot: {e}");
                }
            }
        }

        if self.config.include_open {
            self.copy_referenced_files(introspector, &processes, sink.as_mut());
        }

        let all_pids: Vec<(u32, String)> = processes.iter().map(|p| (p.pid, p.name.clone())).collect();
        let selected_pids = self.run_scan_gate(&all_pids, sink.as_mut())?;

        let mut written_dumps = Vec::new();
        if self.config.include_memory {
            written_dumps = self.dump_memory(&selected_pids, sink.as_mut())?;
        } else if self.config.yara_rule_path.is_some() {
            log::info!("scan ran; memory dumping is disabled so no process produced a .mem artifact");
        }

        sink.finish().map_err(StartupError::ArchiveError)?;

        if self.config.extract_dumps && !written_dumps.is_empty() {
            self.carve_dumps(&written_dumps);
        }

        Ok(())
    }

    fn write_inventory(
        &self,
        introspector: &I,
        processes: &[ProcessRecord],
        sink: &mut dyn ArchiveSink,
    ) -> Result<(), crate::errors::ArchiveError> {
        let processes_json = json_table(processes).expect("process records always serialize");
        sink.put_bytes("processes.json", processes_json.as_bytes())?;

        let referenced_files = introspector.dump_loaded_files(processes);
        #[derive(serde::Serialize)]
        struct OpenFileRow {
            path: String,
        }
        let rows: Vec<OpenFileRow> = referenced_files
            .iter()
            .map(|path| OpenFileRow { path: path.clone() })
            .collect();
        let open_files_json = json_table(&rows).expect("open-file rows always serialize");
        sink.put_bytes("open_files.json", open_files_json.as_bytes())?;

        let connections = introspector.get_network();
        let netstat = render_netstat(&connections);
        sink.put_bytes("netstat.log", netstat.as_bytes())?;

        Ok(())
    }

    fn copy_referenced_files(
        &self,
        introspector: &I,
        processes: &[ProcessRecord],
        sink: &mut dyn ArchiveSink,
    ) {
        for path in introspector.dump_loaded_files(processes) {
            let source = Path::new(&path);
            let size = match std::fs::metadata(source) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    log::warn!("skipping unreadable referenced file {path}: {e}");
                    continue;
                }
            };
            if size > self.config.max_open_file_bytes {
                log::warn!("skipping referenced file {path}: {size} bytes exceeds the copy limit");
                continue;
            }
            let archive_name = format!(
                "collected_files/{}",
                strip_drive(&path).replace('\\', "/")
            );
            if let Err(e) = sink.put_file(&archive_name, source) {
                log::warn!("failed to copy referenced file {path}: {e}");
            }
        }
    }

    /// Runs the YARA scan gate, if one was requested, independent of
    /// whether memory dumping itself is enabled. Writes `yara_results.json`
    /// whenever hits are found and returns the PIDs dumping should proceed
    /// with: every PID if no rule set was given, or just the hitting ones.
    fn run_scan_gate(
        &self,
        all_pids: &[(u32, String)],
        sink: &mut dyn ArchiveSink,
    ) -> Result<Vec<(u32, String)>, StartupError> {
        match &self.config.yara_rule_path {
            Some(rule_path) => {
                match ScanGate::<E, R>::load(
                    rule_path,
                    self.config.scan_timeout,
                ) {
                    Ok(gate) => {
                        let (hits, hitting) = gate.scan_all(all_pids);
                        if !hits.is_empty() {
                            let hits_json = json_table(&hits).expect("scan hits always serialize");
                            sink.put_bytes("yara_results.json", hits_json.as_bytes())
                                .map_err(StartupError::ArchiveError)?;
                        }
                        Ok(all_pids
                            .iter()
                            .filter(|(pid, _)| hitting.contains(pid))
                            .cloned()
                            .collect())
                    }
                    Err(e) => {
                        log::error!("disabling scan gate: {e}");
                        Ok(all_pids.to_vec())
                    }
                }
            }
            None => Ok(all_pids.to_vec()),
        }
    }

    fn dump_memory(
        &self,
        selected_pids: &[(u32, String)],
        sink: &mut dyn ArchiveSink,
    ) -> Result<Vec<String>, StartupError> {
        let self_pid = std::process::id();
        let dumper = ProcessDumper::<E, R>::new(
            self_pid,
            self.config.max_chunk_bytes,
        );
        dumper.dump_all(selected_pids, sink).map_err(StartupError::ArchiveError)
    }

    fn carve_dumps(&self, dump_names: &[String]) {
        let carver = Carver::default();
        for dump_name in dump_names {
            let bytes = match archive::read_entry(&self.config.output_path, dump_name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("could not read back {dump_name} for carving: {e}");
                    continue;
                }
            };
            let artifacts = carver.carve(dump_name, &bytes);
            let entries: Vec<(String, Vec<u8>)> = artifacts
                .into_iter()
                .map(|artifact| (artifact.archive_name(), artifact.bytes))
                .collect();
            if let Err(e) = archive::append_entries(&self.config.output_path, &entries) {
                log::warn!("failed to append carved artifacts for {dump_name}: {e}");
            }
        }
    }
}

fn machine_name() -> String {
    let raw = sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string());
    remove_special_characters(&raw)
}

/// `ArchiveManifest`'s default output path: `<machine>-<unix_timestamp>.zip`.
pub fn default_output_path() -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{}-{}.zip", machine_name(), Utc::now().timestamp()))
}

fn render_netstat(connections: &[NetworkConnection]) -> String {
    let now = Utc::now();
    connections
        .iter()
        .map(|c| c.to_log_line(now))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// End-to-end coverage for `Collector::run`, exercised against fake
/// introspector/enumerator/reader seams rather than the real host, covering
/// the Scenario A-F behaviors: archive contents, the scan-gate-driven `.mem`
/// set, and carving.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ReadError, RegionEnumerationError};
    use crate::inventory::ProcessFilter;
    use crate::model::Region;
    use std::cell::RefCell;
    use std::collections::{BTreeSet, HashMap};

    thread_local! {
        static FAKE_REGIONS: RefCell<HashMap<u32, Vec<Region>>> = RefCell::new(HashMap::new());
        static FAKE_BYTES: RefCell<HashMap<u32, Vec<u8>>> = RefCell::new(HashMap::new());
    }

    fn reset_fakes() {
        FAKE_REGIONS.with(|r| r.borrow_mut().clear());
        FAKE_BYTES.with(|b| b.borrow_mut().clear());
    }

    struct FakeEnumerator;
    impl RegionEnumerator for FakeEnumerator {
        fn enumerate(pid: u32) -> Result<Vec<Region>, RegionEnumerationError> {
            FAKE_REGIONS.with(|r| {
                r.borrow()
                    .get(&pid)
                    .cloned()
                    .ok_or(RegionEnumerationError::Vanished(pid))
            })
        }
    }

    struct FakeReader(u32);
    impl RegionReader for FakeReader {
        fn for_pid(pid: u32) -> Result<Self, ReadError> {
            Ok(FakeReader(pid))
        }
        fn read_chunk(&mut self, _address: u64, length: usize) -> Result<Vec<u8>, ReadError> {
            FAKE_BYTES.with(|b| {
                b.borrow()
                    .get(&self.0)
                    .cloned()
                    .map(|mut v| {
                        v.truncate(length);
                        v
                    })
                    .ok_or(ReadError::Unreadable)
            })
        }
    }

    #[derive(Default, Clone)]
    struct FakeIntrospector {
        processes: Vec<ProcessRecord>,
    }

    impl HostIntrospector for FakeIntrospector {
        fn get_processes(&self, _filter: &ProcessFilter) -> Vec<ProcessRecord> {
            self.processes.clone()
        }
        fn get_network(&self) -> Vec<NetworkConnection> {
            Vec::new()
        }
        fn dump_loaded_files(&self, _processes: &[ProcessRecord]) -> Vec<String> {
            Vec::new()
        }
    }

    fn fake_process(pid: u32, name: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            name: name.to_string(),
            exe_path: None,
            parent_pid: None,
            status: "running".to_string(),
            user: None,
            command_line: String::new(),
            creation_time: "2024-01-01 00:00:00".to_string(),
            open_files: BTreeSet::new(),
            mapped_files: BTreeSet::new(),
            connections: Vec::new(),
        }
    }

    fn base_config(output_path: std::path::PathBuf) -> CollectorConfig {
        CollectorConfig {
            process_filter: ProcessFilter::All,
            include_memory: false,
            include_open: false,
            take_screenshot: false,
            extract_dumps: false,
            yara_rule_path: None,
            output_path,
            max_chunk_bytes: crate::config::DEFAULT_MAX_CHUNK_BYTES,
            max_open_file_bytes: crate::config::DEFAULT_MAX_OPEN_FILE_BYTES,
            scan_timeout: crate::scan::DEFAULT_SCAN_TIMEOUT,
        }
    }

    fn write_rule_file(dir: &Path, condition: &str) -> std::path::PathBuf {
        let mut compiler = yara_x::Compiler::new();
        compiler
            .add_source(format!("rule fake {{ condition: {condition} }}").as_str())
            .expect("valid test rule source");
        let rules = compiler.build();
        let bytes = rules.serialize().expect("test rules serialize");
        let path = dir.join("rules.yarac");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn zip_entry_names(path: &Path) -> Vec<String> {
        let file = std::fs::File::open(path).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    type TestCollector = Collector<FakeIntrospector, FakeEnumerator, FakeReader>;

    #[test]
    fn scenario_a_memory_enabled_scan_disabled_dumps_every_process() {
        reset_fakes();
        let dir = tempfile::tempdir().unwrap();
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(101, vec![Region { start: 0, end: 8, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(101, vec![1, 2, 3, 4, 5, 6, 7, 8]));

        let mut config = base_config(dir.path().join("out.zip"));
        config.include_memory = true;
        let introspector = FakeIntrospector { processes: vec![fake_process(101, "victim")] };
        let collector = TestCollector::with_introspector(config, introspector);
        collector.run().unwrap();

        let names = zip_entry_names(&dir.path().join("out.zip"));
        assert!(names.contains(&"processes.json".to_string()));
        assert!(names.iter().any(|n| n.starts_with("process_dumps/") && n.ends_with(".mem")));
    }

    #[test]
    fn scenario_b_memory_disabled_writes_no_mem_members() {
        reset_fakes();
        let dir = tempfile::tempdir().unwrap();
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(101, vec![Region { start: 0, end: 8, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(101, vec![1, 2, 3, 4, 5, 6, 7, 8]));

        let config = base_config(dir.path().join("out.zip"));
        let introspector = FakeIntrospector { processes: vec![fake_process(101, "victim")] };
        let collector = TestCollector::with_introspector(config, introspector);
        collector.run().unwrap();

        let names = zip_entry_names(&dir.path().join("out.zip"));
        assert!(names.contains(&"processes.json".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".mem")));
    }

    #[test]
    fn scenario_c_scan_matching_all_writes_results_and_dumps_only_hits() {
        reset_fakes();
        let dir = tempfile::tempdir().unwrap();
        FAKE_REGIONS.with(|r| {
            let mut r = r.borrow_mut();
            r.insert(101, vec![Region { start: 0, end: 8, readable: true }]);
            r.insert(102, vec![Region { start: 0, end: 8, readable: true }]);
        });
        FAKE_BYTES.with(|b| {
            let mut b = b.borrow_mut();
            b.insert(101, vec![1; 8]);
            b.insert(102, vec![2; 8]);
        });
        let rule_path = write_rule_file(dir.path(), "true");

        let mut config = base_config(dir.path().join("out.zip"));
        config.include_memory = true;
        config.yara_rule_path = Some(rule_path);
        let introspector = FakeIntrospector {
            processes: vec![fake_process(101, "a"), fake_process(102, "b")],
        };
        let collector = TestCollector::with_introspector(config, introspector);
        collector.run().unwrap();

        let names = zip_entry_names(&dir.path().join("out.zip"));
        assert!(names.contains(&"yara_results.json".to_string()));
        let mem_count = names.iter().filter(|n| n.ends_with(".mem")).count();
        assert_eq!(mem_count, 2);
    }

    #[test]
    fn scenario_d_scan_matching_none_writes_no_results_and_no_mem() {
        reset_fakes();
        let dir = tempfile::tempdir().unwrap();
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(101, vec![Region { start: 0, end: 8, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(101, vec![1; 8]));
        let rule_path = write_rule_file(dir.path(), "false");

        let mut config = base_config(dir.path().join("out.zip"));
        config.include_memory = true;
        config.yara_rule_path = Some(rule_path);
        let introspector = FakeIntrospector { processes: vec![fake_process(101, "a")] };
        let collector = TestCollector::with_introspector(config, introspector);
        collector.run().unwrap();

        let names = zip_entry_names(&dir.path().join("out.zip"));
        assert!(!names.contains(&"yara_results.json".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".mem")));
    }

    /// Regression test for decoupling the scan gate from `include_memory`:
    /// a rule that matches must still produce `yara_results.json` even when
    /// memory dumping itself is off.
    #[test]
    fn scan_gate_runs_even_when_memory_dumping_is_disabled() {
        reset_fakes();
        let dir = tempfile::tempdir().unwrap();
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(101, vec![Region { start: 0, end: 8, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(101, vec![1; 8]));
        let rule_path = write_rule_file(dir.path(), "true");

        let mut config = base_config(dir.path().join("out.zip"));
        config.include_memory = false;
        config.yara_rule_path = Some(rule_path);
        let introspector = FakeIntrospector { processes: vec![fake_process(101, "a")] };
        let collector = TestCollector::with_introspector(config, introspector);
        collector.run().unwrap();

        let names = zip_entry_names(&dir.path().join("out.zip"));
        assert!(names.contains(&"yara_results.json".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".mem")));
    }

    #[test]
    fn scenario_f_carving_produces_artifact_from_embedded_pe_marker() {
        reset_fakes();
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0u8; 20_000];
        bytes.extend_from_slice(b"MZ\x90\x00\x03");
        bytes.extend(std::iter::repeat(0u8).take(4096));
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(101, vec![Region { start: 0, end: bytes.len() as u64, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(101, bytes));

        let mut config = base_config(dir.path().join("out.zip"));
        config.include_memory = true;
        config.extract_dumps = true;
        let introspector = FakeIntrospector { processes: vec![fake_process(101, "victim")] };
        let collector = TestCollector::with_introspector(config, introspector);
        collector.run().unwrap();

        let names = zip_entry_names(&dir.path().join("out.zip"));
        assert!(names.iter().any(|n| n.contains("_carved/")));
    }
}

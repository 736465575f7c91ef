//! §4.4 `ScanGate`: runs a compiled rule set against each live PID's memory
//! before dumping. Built on `yara_x::Scanner`, reading through the same
//! `RegionEnumerator`/`RegionReader` pair the dumper uses rather than a
//! second OS-specific memory-access backend.

use crate::errors::{RuleLoadError, ScanError};
use crate::model::{plan_chunks, ScanHit, ScanMatch};
use crate::reader::RegionReader;
use crate::region::RegionEnumerator;
use base64::Engine;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Default per-PID scan budget. A PID whose scan exceeds this is treated as
/// a [`ScanError`] rather than blocking the whole run.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ScanGate<E, R> {
    rules: yara_x::Rules,
    timeout: Duration,
    _enumerator: PhantomData<E>,
    _reader: PhantomData<R>,
}

impl<E, R> ScanGate<E, R>
where
    E: RegionEnumerator,
    R: RegionReader,
{
    /// Loads a compiled rule set from `path`, scanning each PID with the
    /// given per-process timeout. Any failure here means the gate is
    /// unusable for the run; the caller should log and proceed as if
    /// scanning were never requested.
    pub fn load(path: &Path, timeout: Duration) -> Result<Self, RuleLoadError> {
        let bytes = std::fs::read(path).map_err(|e| RuleLoadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let rules = yara_x::Rules::deserialize(&bytes).map_err(|e| RuleLoadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(ScanGate {
            rules,
            timeout,
            _enumerator: PhantomData,
            _reader: PhantomData,
        })
    }

    #[cfg(test)]
    fn from_source(source: &str) -> Self {
        let mut compiler = yara_x::Compiler::new();
        compiler.add_source(source).expect("valid test rule source");
        ScanGate {
            rules: compiler.build(),
            timeout: DEFAULT_SCAN_TIMEOUT,
            _enumerator: PhantomData,
            _reader: PhantomData,
        }
    }

    /// Scans every `(pid, name)` pair, returning the recorded hits and the
    /// set of PIDs that matched at least one rule. A scan failure on one
    /// PID is logged and does not affect the others.
    pub fn scan_all(&self, pids: &[(u32, String)]) -> (Vec<ScanHit>, Vec<u32>) {
        let mut hits = Vec::new();
        let mut hitting = Vec::new();
        for (pid, name) in pids {
            match self.scan_one(*pid, name) {
                Ok(pid_hits) => {
                    if !pid_hits.is_empty() {
                        hitting.push(*pid);
                        hits.extend(pid_hits);
                    }
                }
                Err(err) => log::warn!("{err}"),
            }
        }
        (hits, hitting)
    }

    fn scan_one(&self, pid: u32, name: &str) -> Result<Vec<ScanHit>, ScanError> {
        let buffer = self.read_process_buffer(pid).map_err(|reason| ScanError { pid, reason })?;

        let started = std::time::Instant::now();
        let mut scanner = yara_x::Scanner::new(&self.rules);
        scanner.set_timeout(self.timeout);
        let results = scanner.scan(&buffer).map_err(|e| ScanError {
            pid,
            reason: e.to_string(),
        })?;
        if started.elapsed() > self.timeout {
            return Err(ScanError {
                pid,
                reason: "scan exceeded the per-process timeout".to_string(),
            });
        }

        let mut hits = Vec::new();
        for matching_rule in results.matching_rules() {
            let tags: Vec<String> = matching_rule.tags().map(|t| t.identifier().to_string()).collect();
            let meta: serde_json::Map<String, serde_json::Value> = matching_rule
                .metadata()
                .map(|(key, value)| (key.to_string(), meta_value_to_json(&value)))
                .collect();

            let mut matches = Vec::new();
            for pattern in matching_rule.patterns() {
                for m in pattern.matches() {
                    let data = m.matched_data();
                    matches.push(ScanMatch {
                        identifier: pattern.identifier().to_string(),
                        offset: m.range().start as u64,
                        length: m.range().len(),
                        xor_key: m.xor_key(),
                        matched_data_b64: base64::engine::general_purpose::STANDARD.encode(data),
                        plaintext: String::from_utf8_lossy(data).into_owned(),
                    });
                }
            }

            hits.push(ScanHit {
                rule: matching_rule.identifier().to_string(),
                namespace: matching_rule.namespace().to_string(),
                tags,
                meta: serde_json::Value::Object(meta),
                pid,
                proc_name: name.to_string(),
                matches,
            });
        }
        Ok(hits)
    }

    fn read_process_buffer(&self, pid: u32) -> Result<Vec<u8>, String> {
        let regions = E::enumerate(pid).map_err(|e| e.to_string())?;
        let mut reader = R::for_pid(pid).map_err(|e| e.to_string())?;
        let mut buffer = Vec::new();
        for region in &regions {
            for chunk in plan_chunks(region, 64 * 1024 * 1024) {
                if let Ok(bytes) = reader.read_chunk(chunk.address, chunk.length) {
                    buffer.extend_from_slice(&bytes);
                }
            }
        }
        Ok(buffer)
    }
}

fn meta_value_to_json(value: &yara_x::MetaValue) -> serde_json::Value {
    match value {
        yara_x::MetaValue::Integer(i) => serde_json::Value::from(*i),
        yara_x::MetaValue::Float(f) => serde_json::Value::from(*f),
        yara_x::MetaValue::Bool(b) => serde_json::Value::from(*b),
        yara_x::MetaValue::String(s) => serde_json::Value::from(s.to_string()),
        yara_x::MetaValue::Bytes(b) => {
            serde_json::Value::from(base64::engine::general_purpose::STANDARD.encode(b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ReadError, RegionEnumerationError};
    use crate::model::Region;
    use std::cell::RefCell;
    use std::collections::HashMap;

    thread_local! {
        static FAKE_REGIONS: RefCell<HashMap<u32, Vec<Region>>> = RefCell::new(HashMap::new());
        static FAKE_BYTES: RefCell<HashMap<u32, Vec<u8>>> = RefCell::new(HashMap::new());
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

    #[test]
    fn scan_one_records_hit_for_matching_buffer() {
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(5, vec![Region { start: 0, end: 16, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(5, b"findmemarkerhere".to_vec()));

        let gate = ScanGate::<FakeEnumerator, FakeReader>::from_source(
            "rule marker { strings: $a = \"marker\" condition: $a }",
        );
        let hits = gate.scan_one(5, "proc").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule, "marker");
        assert_eq!(hits[0].pid, 5);
    }

    #[test]
    fn scan_all_skips_failing_pid_without_aborting_others() {
        FAKE_REGIONS.with(|r| {
            let mut r = r.borrow_mut();
            r.insert(5, vec![Region { start: 0, end: 16, readable: true }]);
            // pid 6 has no entry: enumerate fails with Vanished.
        });
        FAKE_BYTES.with(|b| b.borrow_mut().insert(5, b"findmemarkerhere".to_vec()));

        let gate = ScanGate::<FakeEnumerator, FakeReader>::from_source(
            "rule marker { strings: $a = \"marker\" condition: $a }",
        );
        let (hits, hitting) = gate.scan_all(&[(5, "ok".to_string()), (6, "gone".to_string())]);
        assert_eq!(hitting, vec![5]);
        assert_eq!(hits.len(), 1);
    }
}

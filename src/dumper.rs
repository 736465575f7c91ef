//! §4.3 `ProcessDumper`: enumerate → read → append-to-archive per PID.
//! Generic over the enumerator/reader traits so the orchestration logic
//! can be exercised against a stand-in region source in tests, the way
//! the upstream dumper separated platform I/O from sequencing.

use crate::archive::ArchiveSink;
use crate::errors::OutOfMemory;
use crate::model::{plan_chunks, Region};
use crate::reader::RegionReader;
use crate::region::RegionEnumerator;
use crate::string_manips::sanitize;
use std::marker::PhantomData;

/// Bytes of free system memory below which further dumping is abandoned.
/// Conservative: large enough to let the last partially-built dump and the
/// archive writer finish without the process itself getting OOM-killed.
const LOW_MEMORY_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

pub struct ProcessDumper<E, R> {
    self_pid: u32,
    max_chunk: u64,
    _enumerator: PhantomData<E>,
    _reader: PhantomData<R>,
}

/// One process's dump outcome: the archive member name and its bytes, ready
/// to hand to an [`ArchiveSink`].
pub struct DumpOutcome {
    pub entry_name: String,
    pub bytes: Vec<u8>,
}

impl<E, R> ProcessDumper<E, R>
where
    E: RegionEnumerator,
    R: RegionReader,
{
    pub fn new(self_pid: u32, max_chunk: u64) -> Self {
        ProcessDumper {
            self_pid,
            max_chunk,
            _enumerator: PhantomData,
            _reader: PhantomData,
        }
    }

    /// Dumps every selected PID (minus `self_pid`) to `sink`, returning the
    /// archive member names actually written. Stops early, without error,
    /// if the host is observed to be critically low on free memory.
    pub fn dump_all(
        &self,
        pids: &[(u32, String)],
        sink: &mut dyn ArchiveSink,
    ) -> Result<Vec<String>, crate::errors::ArchiveError> {
        let mut written = Vec::new();
        for (pid, name) in pids {
            if *pid == self.self_pid {
                continue;
            }
            if self.host_low_on_memory() {
                let oom = OutOfMemory { pid: *pid };
                log::warn!("{oom}: abandoning further dumping");
                break;
            }
            match self.dump_one(*pid, name) {
                Some(outcome) => {
                    sink.put_bytes(&outcome.entry_name, &outcome.bytes)?;
                    written.push(outcome.entry_name);
                }
                None => continue,
            }
        }
        Ok(written)
    }

    /// Dumps a single PID, or returns `None` if it should be skipped
    /// (no readable regions, or a structural enumerator/reader failure).
    fn dump_one(&self, pid: u32, name: &str) -> Option<DumpOutcome> {
        let regions = match E::enumerate(pid) {
            Ok(regions) => regions,
            Err(e) => {
                log::warn!("skipping pid {pid}: {e}");
                return None;
            }
        };
        if regions.is_empty() {
            return None;
        }

        let mut reader = match R::for_pid(pid) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("skipping pid {pid}: {e}");
                return None;
            }
        };

        let mut bytes = Vec::new();
        for region in &regions {
            if let Err(abort) = self.read_region(&mut reader, pid, region, &mut bytes) {
                log::warn!("aborting dump of pid {pid}: {abort}");
                return None;
            }
        }

        Some(DumpOutcome {
            entry_name: format!("process_dumps/{}_{pid}.mem", sanitize(name)),
            bytes,
        })
    }

    /// Reads every chunk of `region` into `out`. Unreadable chunks are
    /// skipped; a `Denied`/`Vanished` error aborts the whole PID's dump.
    fn read_region(
        &self,
        reader: &mut R,
        pid: u32,
        region: &Region,
        out: &mut Vec<u8>,
    ) -> Result<(), crate::errors::ReadError> {
        use crate::errors::ReadError;

        for chunk in plan_chunks(region, self.max_chunk) {
            match reader.read_chunk(chunk.address, chunk.length) {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(ReadError::Unreadable) => {
                    log::debug!(
                        "pid {pid}: chunk at {:#x} (len {}) unreadable, skipping",
                        chunk.address,
                        chunk.length
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn host_low_on_memory(&self) -> bool {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        sys.available_memory() < LOW_MEMORY_THRESHOLD_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ReadError, RegionEnumerationError};
    use std::cell::RefCell;
    use std::collections::HashMap;

    thread_local! {
        static FAKE_REGIONS: RefCell<HashMap<u32, Vec<Region>>> = RefCell::new(HashMap::new());
        static FAKE_BYTES: RefCell<HashMap<u64, Vec<u8>>> = RefCell::new(HashMap::new());
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

    struct FakeReader;
    impl RegionReader for FakeReader {
        fn for_pid(_pid: u32) -> Result<Self, ReadError> {
            Ok(FakeReader)
        }
        fn read_chunk(&mut self, address: u64, length: usize) -> Result<Vec<u8>, ReadError> {
            FAKE_BYTES.with(|b| {
                b.borrow()
                    .get(&address)
                    .cloned()
                    .map(|mut v| {
                        v.truncate(length);
                        v
                    })
                    .ok_or(ReadError::Unreadable)
            })
        }
    }

    fn reset() {
        FAKE_REGIONS.with(|r| r.borrow_mut().clear());
        FAKE_BYTES.with(|b| b.borrow_mut().clear());
    }

    #[test]
    fn dump_one_concatenates_readable_chunks_and_skips_unreadable() {
        reset();
        FAKE_REGIONS.with(|r| {
            r.borrow_mut().insert(
                42,
                vec![
                    Region { start: 0, end: 4, readable: true },
                    Region { start: 100, end: 104, readable: true },
                ],
            );
        });
        FAKE_BYTES.with(|b| {
            b.borrow_mut().insert(0, vec![1, 2, 3, 4]);
            // 100 left unmapped: reader returns Unreadable for it.
        });

        let dumper = ProcessDumper::<FakeEnumerator, FakeReader>::new(999, 256 * 1024 * 1024);
        let outcome = dumper.dump_one(42, "proc").unwrap();
        assert_eq!(outcome.bytes, vec![1, 2, 3, 4]);
        assert_eq!(outcome.entry_name, "process_dumps/proc_42.mem");
    }

    #[test]
    fn dump_one_returns_none_for_empty_regions() {
        reset();
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(7, Vec::new()));
        let dumper = ProcessDumper::<FakeEnumerator, FakeReader>::new(999, 256 * 1024 * 1024);
        assert!(dumper.dump_one(7, "empty").is_none());
    }

    #[test]
    fn dump_all_excludes_self_pid() {
        reset();
        FAKE_REGIONS.with(|r| r.borrow_mut().insert(1, vec![Region { start: 0, end: 4, readable: true }]));
        FAKE_BYTES.with(|b| b.borrow_mut().insert(0, vec![9, 9, 9, 9]));

        let dumper = ProcessDumper::<FakeEnumerator, FakeReader>::new(1, 256 * 1024 * 1024);
        let mut buf = Vec::new();
        struct MemSink<'a>(&'a mut Vec<(String, Vec<u8>)>);
        impl<'a> ArchiveSink for MemSink<'a> {
            fn put_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), crate::errors::ArchiveError> {
                self.0.push((name.to_string(), bytes.to_vec()));
                Ok(())
            }
            fn put_file(&mut self, _name: &str, _source_path: &std::path::Path) -> Result<(), crate::errors::ArchiveError> {
                unreachable!()
            }
            fn finish(self: Box<Self>) -> Result<(), crate::errors::ArchiveError> {
                Ok(())
            }
        }
        let mut sink = MemSink(&mut buf);
        let written = dumper
            .dump_all(&[(1, "self".to_string())], &mut sink)
            .unwrap();
        assert!(written.is_empty());
    }
}

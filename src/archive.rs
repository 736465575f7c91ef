//! The append-only archive container (§4.7). Two variants, picked by the
//! output path's suffix: a deflated zip (default) or an lz4-framed tar when
//! the path ends in `.tar.lz4`. Archive entry names always use forward
//! slashes, matching the original's `zipfile`/`tarfile` behavior on every OS.

use crate::errors::ArchiveError;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

fn io_err(name: &str, source: std::io::Error) -> ArchiveError {
    ArchiveError::Io {
        name: name.to_string(),
        source,
    }
}

/// A single append-only writer for one collection run. `put_bytes`/`put_file`
/// may be called repeatedly from any of the collector's phases; `finish`
/// flushes and closes the underlying container.
pub trait ArchiveSink {
    fn put_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError>;
    fn put_file(&mut self, name: &str, source_path: &Path) -> Result<(), ArchiveError>;
    fn finish(self: Box<Self>) -> Result<(), ArchiveError>;
}

pub fn is_tar_lz4(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".tar.lz4")
}

/// Opens (creating if necessary) the sink appropriate for `path`'s suffix.
pub fn open_sink(path: &Path) -> Result<Box<dyn ArchiveSink>, ArchiveError> {
    if is_tar_lz4(path) {
        Ok(Box::new(TarLz4Sink::create(path)?))
    } else {
        Ok(Box::new(ZipSink::open_or_create(path)?))
    }
}

// ---------------------------------------------------------------------
// zip
// ---------------------------------------------------------------------

struct ZipSink {
    writer: zip::ZipWriter<File>,
}

impl ZipSink {
    fn open_or_create(path: &Path) -> Result<Self, ArchiveError> {
        let writer = if path.exists() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
            zip::ZipWriter::new_append(file).map_err(|e| ArchiveError::Zip {
                name: path.to_string_lossy().to_string(),
                reason: e.to_string(),
            })?
        } else {
            let file = File::create(path).map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
            zip::ZipWriter::new(file)
        };
        Ok(Self { writer })
    }

    fn options() -> zip::write::FileOptions {
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated)
    }
}

impl ArchiveSink for ZipSink {
    fn put_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.writer
            .start_file(name, Self::options())
            .map_err(|e| ArchiveError::Zip {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        self.writer
            .write_all(bytes)
            .map_err(|e| io_err(name, e))
    }

    fn put_file(&mut self, name: &str, source_path: &Path) -> Result<(), ArchiveError> {
        let mut f = File::open(source_path).map_err(|e| io_err(name, e))?;
        self.writer
            .start_file(name, Self::options())
            .map_err(|e| ArchiveError::Zip {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        std::io::copy(&mut f, &mut self.writer).map_err(|e| io_err(name, e))?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), ArchiveError> {
        self.writer.finish().map_err(|e| ArchiveError::Zip {
            name: "<finish>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

fn zip_mem_entries(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(path).map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
    let archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Zip {
        name: path.to_string_lossy().to_string(),
        reason: e.to_string(),
    })?;
    Ok(archive
        .file_names()
        .filter(|n| n.starts_with("process_dumps/") && n.ends_with(".mem"))
        .map(str::to_string)
        .collect())
}

fn zip_read_entry(path: &Path, name: &str) -> Result<Vec<u8>, ArchiveError> {
    let file = File::open(path).map_err(|e| io_err(name, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Zip {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    let mut entry = archive.by_name(name).map_err(|e| ArchiveError::Zip {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes).map_err(|e| io_err(name, e))?;
    Ok(bytes)
}

fn zip_append_entries(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ArchiveError> {
    let mut sink = ZipSink::open_or_create(path)?;
    for (name, bytes) in entries {
        sink.put_bytes(name, bytes)?;
    }
    Box::new(sink).finish()
}

// ---------------------------------------------------------------------
// lz4-framed tar
// ---------------------------------------------------------------------

struct TarLz4Sink {
    builder: tar::Builder<lz4_flex::frame::FrameEncoder<File>>,
}

impl TarLz4Sink {
    /// The lz4 frame format has no cheap append story, so a fresh run always
    /// starts a brand new container; re-opening an existing `.tar.lz4` for
    /// further appends goes through [`tar_lz4_append_entries`] instead, which
    /// decodes the whole thing and re-encodes it (see DESIGN.md).
    fn create(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::create(path).map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
        let encoder = lz4_flex::frame::FrameEncoder::new(file);
        Ok(Self {
            builder: tar::Builder::new(encoder),
        })
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        self.builder
            .append_data(&mut header, name, bytes)
            .map_err(|e| io_err(name, e))
    }
}

impl ArchiveSink for TarLz4Sink {
    fn put_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.append(name, bytes)
    }

    fn put_file(&mut self, name: &str, source_path: &Path) -> Result<(), ArchiveError> {
        let bytes = fs::read(source_path).map_err(|e| io_err(name, e))?;
        self.append(name, &bytes)
    }

    fn finish(self: Box<Self>) -> Result<(), ArchiveError> {
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| io_err("<finish>", e))?;
        encoder
            .finish()
            .map_err(|e| io_err("<finish>", e))?;
        Ok(())
    }
}

fn tar_lz4_read_all(path: &Path) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let file = File::open(path).map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
    let decoder = lz4_flex::frame::FrameDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut out = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?
    {
        let mut entry = entry.map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
        let name = entry.path().map_err(|e| io_err("<entry path>", e))?.to_string_lossy().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(|e| io_err(&name, e))?;
        out.push((name, bytes));
    }
    Ok(out)
}

fn tar_lz4_append_entries(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ArchiveError> {
    let existing = if path.exists() {
        tar_lz4_read_all(path)?
    } else {
        Vec::new()
    };
    let tmp_path: PathBuf = path.with_extension("rebuild.tmp");
    {
        let mut sink = TarLz4Sink::create(&tmp_path)?;
        for (name, bytes) in &existing {
            sink.append(name, bytes)?;
        }
        for (name, bytes) in entries {
            sink.append(name, bytes)?;
        }
        Box::new(sink).finish()?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path.to_string_lossy().as_ref(), e))?;
    Ok(())
}

// ---------------------------------------------------------------------
// carver-facing read/append helpers, dispatched by suffix
// ---------------------------------------------------------------------

/// Lists `process_dumps/*.mem` members already finalized in the archive.
pub fn mem_entries(path: &Path) -> Result<Vec<String>, ArchiveError> {
    if is_tar_lz4(path) {
        Ok(tar_lz4_read_all(path)?
            .into_iter()
            .filter(|(name, _)| name.starts_with("process_dumps/") && name.ends_with(".mem"))
            .map(|(name, _)| name)
            .collect())
    } else {
        zip_mem_entries(path)
    }
}

/// Reads one member's full contents.
pub fn read_entry(path: &Path, name: &str) -> Result<Vec<u8>, ArchiveError> {
    if is_tar_lz4(path) {
        tar_lz4_read_all(path)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| ArchiveError::Zip {
                name: name.to_string(),
                reason: "entry not found".to_string(),
            })
    } else {
        zip_read_entry(path, name)
    }
}

/// Appends a batch of new members to an already-finalized archive.
pub fn append_entries(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ArchiveError> {
    if entries.is_empty() {
        return Ok(());
    }
    if is_tar_lz4(path) {
        tar_lz4_append_entries(path, entries)
    } else {
        zip_append_entries(path, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zip");
        let sink = open_sink(&path).unwrap();
        let mut sink = sink;
        sink.put_bytes("processes.json", b"{}").unwrap();
        sink.put_bytes("process_dumps/foo_1.mem", b"hello world").unwrap();
        sink.finish().unwrap();

        let mems = mem_entries(&path).unwrap();
        assert_eq!(mems, vec!["process_dumps/foo_1.mem".to_string()]);
        let bytes = read_entry(&path, "process_dumps/foo_1.mem").unwrap();
        assert_eq!(bytes, b"hello world");

        append_entries(&path, &[("process_dumps/foo_1_carved/1.bin".to_string(), vec![1, 2, 3])])
            .unwrap();
        let bytes = read_entry(&path, "process_dumps/foo_1_carved/1.bin").unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn tar_lz4_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tar.lz4");
        let sink = open_sink(&path).unwrap();
        let mut sink = sink;
        sink.put_bytes("processes.json", b"{}").unwrap();
        sink.put_bytes("process_dumps/foo_1.mem", b"hello world").unwrap();
        sink.finish().unwrap();

        let mems = mem_entries(&path).unwrap();
        assert_eq!(mems, vec!["process_dumps/foo_1.mem".to_string()]);
        let bytes = read_entry(&path, "process_dumps/foo_1.mem").unwrap();
        assert_eq!(bytes, b"hello world");

        append_entries(&path, &[("process_dumps/foo_1_carved/1.bin".to_string(), vec![4, 5, 6])])
            .unwrap();
        let bytes = read_entry(&path, "process_dumps/foo_1_carved/1.bin").unwrap();
        assert_eq!(bytes, vec![4, 5, 6]);
    }
}

//! The data model from §3: process records, memory regions, chunk plans and
//! the JSON envelope every table-shaped artifact is wrapped in.

use serde::Serialize;
use std::collections::BTreeSet;

/// One row of process inventory. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub exe_path: Option<String>,
    pub parent_pid: Option<u32>,
    pub status: String,
    pub user: Option<String>,
    pub command_line: String,
    /// UTC, second precision, `YYYY-MM-DD HH:MM:SS`.
    pub creation_time: String,
    pub open_files: BTreeSet<String>,
    pub mapped_files: BTreeSet<String>,
    pub connections: Vec<String>,
}

/// A readable virtual address range, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
}

impl Region {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// One `(address, length)` piece of a [`Region`], no larger than `MAX_CHUNK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub address: u64,
    pub length: usize,
}

/// Splits a region into chunks no larger than `max_chunk`, by floor-division
/// with remainder rather than the source's truncate-then-recompute scheme
/// (see DESIGN.md for why: the original can produce a trailing piece that
/// overshoots the region on certain lengths).
pub fn plan_chunks(region: &Region, max_chunk: u64) -> Vec<Chunk> {
    let len = region.len();
    if len == 0 {
        return Vec::new();
    }
    if len <= max_chunk {
        return vec![Chunk {
            address: region.start,
            length: len as usize,
        }];
    }

    let full_chunks = len / max_chunk;
    let remainder = len % max_chunk;
    let mut chunks = Vec::with_capacity((full_chunks + 1) as usize);
    let mut addr = region.start;
    for _ in 0..full_chunks {
        chunks.push(Chunk {
            address: addr,
            length: max_chunk as usize,
        });
        addr += max_chunk;
    }
    if remainder > 0 {
        chunks.push(Chunk {
            address: addr,
            length: remainder as usize,
        });
    }
    chunks
}

/// A single YARA string-match instance within a [`ScanHit`].
#[derive(Debug, Clone, Serialize)]
pub struct ScanMatch {
    pub identifier: String,
    pub offset: u64,
    pub length: usize,
    pub xor_key: u8,
    pub matched_data_b64: String,
    pub plaintext: String,
}

/// One rule trigger against one process's memory.
#[derive(Debug, Clone, Serialize)]
pub struct ScanHit {
    pub rule: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub meta: serde_json::Value,
    pub pid: u32,
    pub proc_name: String,
    pub matches: Vec<ScanMatch>,
}

/// The kind of run a [`CarvedArtifact`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Text,
    Binary,
}

/// One file carved out of a memory dump.
#[derive(Debug, Clone)]
pub struct CarvedArtifact {
    pub source_dump: String,
    pub sequence: usize,
    pub sub_sequence: Option<usize>,
    pub kind: ArtifactKind,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl CarvedArtifact {
    /// The `.bin` / `.log` / mime-derived extension this artifact is filed under.
    pub fn extension(&self) -> &str {
        match self.kind {
            ArtifactKind::Text => "log",
            ArtifactKind::Binary => {
                if self.mime == "application/octet-stream" {
                    "bin"
                } else {
                    mime_extension(&self.mime).unwrap_or("bin")
                }
            }
        }
    }

    /// Archive member name: `process_dumps/<dump>_carved/<prefix><n>[_<sub>].<ext>`.
    pub fn archive_name(&self) -> String {
        let prefix = self
            .source_dump
            .strip_suffix(".mem")
            .unwrap_or(&self.source_dump);
        match self.sub_sequence {
            Some(sub) => format!(
                "process_dumps/{prefix}_carved/{prefix}{seq}_{sub}.{ext}",
                prefix = prefix,
                seq = self.sequence,
                sub = sub,
                ext = self.extension(),
            ),
            None => format!(
                "process_dumps/{prefix}_carved/{prefix}{seq}.{ext}",
                prefix = prefix,
                seq = self.sequence,
                ext = self.extension(),
            ),
        }
    }
}

fn mime_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "application/zip" => Some("zip"),
        "application/x-7z-compressed" => Some("7z"),
        "application/x-rar-compressed" | "application/vnd.rar" => Some("rar"),
        "application/x-bzip2" => Some("bz2"),
        "application/x-msdownload" | "application/vnd.microsoft.portable-executable" => {
            Some("exe")
        }
        "application/x-elf" => Some("elf"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "text/html" => Some("html"),
        _ => None,
    }
}

/// Wraps table-shaped rows in the `{"format":"CadoJsonTable","rows":[...]}`
/// envelope, two-space indented, keys kept in field-declaration order (serde
/// derives already preserve that; we never sort).
pub fn json_table<T: Serialize>(rows: &[T]) -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        format: &'static str,
        rows: &'a [T],
    }
    let envelope = Envelope {
        format: "CadoJsonTable",
        rows,
    };
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(
        &mut out,
        serde_json::ser::PrettyFormatter::with_indent(b"  "),
    );
    serde::Serialize::serialize(&envelope, &mut ser)?;
    Ok(String::from_utf8(out).expect("serde_json always emits valid utf8"))
}

/// Raw descriptor import
///
/// Walks the input directory and turns every file into the raw records it
/// holds. Files starting with `router ` or `extra-info ` may hold several
/// concatenated descriptors; anything else is a single network status.

use bridgesan_common::{PublishedTime, RecordKind, Result, SanitizerError};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Problem files listed in the import warning before it is cut short
const MAX_REPORTED_PROBLEMS: usize = 3;

const STATUS_FILE_STAMP: &str = "%Y%m%d-%H%M%S";

/// One raw descriptor read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: RecordKind,
    pub data: Vec<u8>,
    /// Only set for statuses, from the file name
    pub publication_time: Option<PublishedTime>,
    pub source: PathBuf,
}

/// Everything imported in one run
#[derive(Debug, Default)]
pub struct ImportReport {
    pub records: Vec<RawRecord>,
    pub files: usize,
    pub problems: Vec<PathBuf>,
}

/// Kind of the records in a file, judged by its first keyword line
pub fn classify(data: &[u8]) -> RecordKind {
    let first = data
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .find(|line| !line.is_empty() && !line.starts_with(b"@"));
    match first {
        Some(line) if line.starts_with(b"router ") => RecordKind::ServerDescriptor,
        Some(line) if line.starts_with(b"extra-info ") => RecordKind::ExtraInfo,
        _ => RecordKind::NetworkStatus,
    }
}

/// Split concatenated descriptors before every line starting with `keyword`.
///
/// Whatever precedes the first descriptor, such as `@purpose` annotations,
/// stays with it.
pub fn split_descriptors<'a>(data: &'a [u8], keyword: &str) -> Vec<&'a [u8]> {
    let keyword = keyword.as_bytes();
    let mut chunks = Vec::new();
    let mut begin = 0;
    let mut offset = 0;
    let mut seen_first = false;
    for line in data.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(keyword) {
            if seen_first {
                chunks.push(&data[begin..offset]);
                begin = offset;
            }
            seen_first = true;
        }
        offset += line.len();
    }
    chunks.push(&data[begin..]);
    chunks
}

/// Publication time encoded in a status file name such as
/// `20240517-130000-4A0CCD2DDC7995083D73F5D667100C8A5831F16D`
pub fn publication_time_from_file_name(name: &str) -> Option<PublishedTime> {
    let stamp = name.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, STATUS_FILE_STAMP)
        .ok()
        .map(PublishedTime::from_naive)
}

/// Reads raw descriptors from an input directory
pub struct DescriptorImporter {
    input_dir: PathBuf,
}

impl DescriptorImporter {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    /// All regular files below the input directory, in path order
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.input_dir.exists() {
            debug!("Input directory {} does not exist", self.input_dir.display());
            return Ok(files);
        }
        let mut pending = vec![self.input_dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Raw records held by one file
    pub fn import_file(&self, path: &Path) -> Result<Vec<RawRecord>> {
        let data = fs::read(path)?;
        let kind = classify(&data);
        let records = match kind {
            RecordKind::NetworkStatus => {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| {
                        SanitizerError::import(format!("bad file name {}", path.display()))
                    })?;
                let publication_time = publication_time_from_file_name(name);
                if publication_time.is_none() {
                    debug!("No publication time in status file name {}", name);
                }
                vec![RawRecord {
                    kind,
                    data,
                    publication_time,
                    source: path.to_path_buf(),
                }]
            }
            RecordKind::ServerDescriptor | RecordKind::ExtraInfo => {
                let keyword = if kind == RecordKind::ServerDescriptor {
                    "router "
                } else {
                    "extra-info "
                };
                split_descriptors(&data, keyword)
                    .into_iter()
                    .map(|chunk| RawRecord {
                        kind,
                        data: chunk.to_vec(),
                        publication_time: None,
                        source: path.to_path_buf(),
                    })
                    .collect()
            }
        };
        Ok(records)
    }

    /// Import every file, collecting unreadable ones instead of failing
    pub fn import_all(&self) -> Result<ImportReport> {
        debug!("Importing files in directory {}/...", self.input_dir.display());
        let mut report = ImportReport::default();
        for path in self.files()? {
            report.files += 1;
            match self.import_file(&path) {
                Ok(records) => report.records.extend(records),
                Err(e) => {
                    debug!("Failed importing {}: {}", path.display(), e);
                    report.problems.push(path);
                }
            }
        }

        if report.problems.is_empty() {
            debug!("Finished importing files in directory {}/.", self.input_dir.display());
        } else {
            let mut listed: Vec<String> = report
                .problems
                .iter()
                .take(MAX_REPORTED_PROBLEMS)
                .map(|p| format!("\n  {}", p.display()))
                .collect();
            if report.problems.len() > MAX_REPORTED_PROBLEMS {
                listed.push("\n  ... more".to_string());
            }
            warn!(
                "Failed importing files in directory {}/:{}",
                self.input_dir.display(),
                listed.concat()
            );
        }
        Ok(report)
    }
}

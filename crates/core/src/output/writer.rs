use crate::sanitizer::SanitizedRecord;
use bridgesan_common::{RecordKind, SanitizerConfig, DEFAULT_AUTHORITY_FINGERPRINT};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Run start as used in mirror file names, e.g. `2024-05-17-13-05-00`
pub const BATCH_ID_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

pub fn batch_id(started: DateTime<Utc>) -> String {
    started.format(BATCH_ID_FORMAT).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Could not write sanitized {kind} to {path}: {source}")]
    Io {
        kind: RecordKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Digest '{digest}' of {kind} is too short to name an archive path")]
    ShortDigest { kind: RecordKind, digest: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to the archive and the mirror
    Stored,
    /// Already archived; only the mirror was written
    Duplicate,
}

/// Writes sanitized records to the archive and the recent mirror
#[derive(Debug, Clone)]
pub struct SanitizedOutputWriter {
    sanitized_root: PathBuf,
    recent_root: PathBuf,
    batch_id: String,
    authority_fingerprint: String,
}

impl SanitizedOutputWriter {
    pub fn new(
        sanitized_root: impl Into<PathBuf>,
        recent_root: impl Into<PathBuf>,
        batch_id: impl Into<String>,
    ) -> Self {
        Self {
            sanitized_root: sanitized_root.into(),
            recent_root: recent_root.into(),
            batch_id: batch_id.into(),
            authority_fingerprint: DEFAULT_AUTHORITY_FINGERPRINT.to_string(),
        }
    }

    pub fn from_config(config: &SanitizerConfig, started: DateTime<Utc>) -> Self {
        Self::new(&config.sanitized_dir, &config.recent_dir, batch_id(started))
            .with_authority_fingerprint(&config.authority_fingerprint)
    }

    pub fn with_authority_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.authority_fingerprint = fingerprint.into();
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn recent_root(&self) -> &Path {
        &self.recent_root
    }

    /// Archive location of a record
    pub fn permanent_path(&self, record: &SanitizedRecord) -> Result<PathBuf, WriteError> {
        let month = record.published.month();
        let mut path = self
            .sanitized_root
            .join(format!("{:04}", month.year()))
            .join(format!("{:02}", month.month()))
            .join(record.kind.category());
        match record.kind {
            RecordKind::NetworkStatus => {
                path.push(format!("{:02}", record.published.day()));
                path.push(self.status_file_name(record));
            }
            RecordKind::ServerDescriptor | RecordKind::ExtraInfo => {
                let digest = &record.digest.sha1_hex;
                let (first, second) = digest
                    .get(..1)
                    .zip(digest.get(1..2))
                    .ok_or_else(|| WriteError::ShortDigest {
                        kind: record.kind,
                        digest: digest.clone(),
                    })?;
                path.push(first);
                path.push(second);
                path.push(digest);
            }
        }
        Ok(path)
    }

    /// Mirror location of a record
    pub fn mirror_path(&self, record: &SanitizedRecord) -> PathBuf {
        let dir = self.recent_root.join(record.kind.category());
        match record.kind {
            RecordKind::NetworkStatus => dir.join(self.status_file_name(record)),
            RecordKind::ServerDescriptor | RecordKind::ExtraInfo => {
                dir.join(format!("{}-{}.tmp", self.batch_id, record.kind.category()))
            }
        }
    }

    fn status_file_name(&self, record: &SanitizedRecord) -> String {
        format!(
            "{}-{}",
            record.published.file_stamp(),
            self.authority_fingerprint
        )
    }

    /// Write a record to the archive, unless it is already there, and to the
    /// mirror.
    ///
    /// Descriptors are appended to the batch's mirror file; statuses replace
    /// their mirror file.
    pub fn write(&self, record: &SanitizedRecord) -> Result<WriteOutcome, WriteError> {
        let rendered = record.render();
        let permanent = self.permanent_path(record)?;

        let outcome = if permanent.exists() {
            debug!("{} already archived at {}", record.kind, permanent.display());
            WriteOutcome::Duplicate
        } else {
            atomic_write(&permanent, rendered.as_bytes()).map_err(|source| WriteError::Io {
                kind: record.kind,
                path: permanent.clone(),
                source,
            })?;
            trace!("Archived {} at {}", record.kind, permanent.display());
            WriteOutcome::Stored
        };

        let mirror = self.mirror_path(record);
        let written = match record.kind {
            RecordKind::NetworkStatus => atomic_write(&mirror, rendered.as_bytes()),
            RecordKind::ServerDescriptor | RecordKind::ExtraInfo => {
                append(&mirror, rendered.as_bytes())
            }
        };
        written.map_err(|source| WriteError::Io {
            kind: record.kind,
            path: mirror,
            source,
        })?;

        Ok(outcome)
    }
}

/// Write to `dest.partial` and rename, so readers never see a partial file
fn atomic_write(dest: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".partial");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dest)
}

fn append(dest: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(dest)?;
    file.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitizer::RecordDigest;
    use bridgesan_common::PublishedTime;
    use chrono::TimeZone;

    fn record(kind: RecordKind, digest: &str) -> SanitizedRecord {
        SanitizedRecord {
            kind,
            published: PublishedTime::parse("2024-05-07 13:00:00").unwrap(),
            lines: vec!["published 2024-05-07 13:00:00".to_string()],
            digest: RecordDigest::sha1_only(digest.to_string()),
        }
    }

    fn writer(root: &Path) -> SanitizedOutputWriter {
        SanitizedOutputWriter::new(root.join("out"), root.join("recent"), "2024-05-07-13-05-00")
            .with_authority_fingerprint("AUTH")
    }

    #[test]
    fn test_batch_id() {
        let started = Utc.with_ymd_and_hms(2024, 5, 7, 13, 5, 0).unwrap();
        assert_eq!(batch_id(started), "2024-05-07-13-05-00");
    }

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let server = record(RecordKind::ServerDescriptor, "ab12cd");
        assert_eq!(
            writer.permanent_path(&server).unwrap(),
            dir.path().join("out/2024/05/server-descriptors/a/b/ab12cd")
        );
        assert_eq!(
            writer.mirror_path(&server),
            dir.path()
                .join("recent/server-descriptors/2024-05-07-13-05-00-server-descriptors.tmp")
        );

        let status = record(RecordKind::NetworkStatus, "ffff");
        assert_eq!(
            writer.permanent_path(&status).unwrap(),
            dir.path().join("out/2024/05/statuses/07/20240507-130000-AUTH")
        );
        assert_eq!(
            writer.mirror_path(&status),
            dir.path().join("recent/statuses/20240507-130000-AUTH")
        );
    }

    #[test]
    fn test_duplicate_descriptor_is_archived_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());
        let extra_info = record(RecordKind::ExtraInfo, "0123");

        assert_eq!(writer.write(&extra_info).unwrap(), WriteOutcome::Stored);
        assert_eq!(writer.write(&extra_info).unwrap(), WriteOutcome::Duplicate);

        let archived = fs::read_to_string(writer.permanent_path(&extra_info).unwrap()).unwrap();
        assert_eq!(archived, extra_info.render());

        let mirrored = fs::read_to_string(writer.mirror_path(&extra_info)).unwrap();
        assert_eq!(mirrored, extra_info.render().repeat(2));
    }

    #[test]
    fn test_status_mirror_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());
        let status = record(RecordKind::NetworkStatus, "0123");

        assert_eq!(writer.write(&status).unwrap(), WriteOutcome::Stored);
        assert_eq!(writer.write(&status).unwrap(), WriteOutcome::Duplicate);
        let mirrored = fs::read_to_string(writer.mirror_path(&status)).unwrap();
        assert_eq!(mirrored, status.render());
        assert!(mirrored.starts_with("@type bridge-network-status 1.0\n"));
    }

    #[test]
    fn test_unwritable_archive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out"), b"").unwrap();
        let writer = writer(dir.path());
        let err = writer
            .write(&record(RecordKind::ServerDescriptor, "0123"))
            .unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
    }

    #[test]
    fn test_short_digest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());
        let truncated = record(RecordKind::ServerDescriptor, "a");
        assert!(matches!(
            writer.permanent_path(&truncated),
            Err(WriteError::ShortDigest { .. })
        ));
        assert!(matches!(
            writer.write(&truncated),
            Err(WriteError::ShortDigest { .. })
        ));
        assert!(!dir.path().join("out").exists());

        let status = record(RecordKind::NetworkStatus, "");
        assert!(writer.permanent_path(&status).is_ok());
    }
}

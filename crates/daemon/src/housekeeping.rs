/// Recent mirror housekeeping
///
/// After a run, the batch's `.tmp` mirror files are published by dropping
/// the extension, and mirror files untouched for three days are removed.

use bridgesan_common::limits::RECENT_RETENTION_SECS;
use bridgesan_common::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub promoted: usize,
    pub deleted: usize,
}

/// Clean up the mirror below `recent_root` as of `now`
pub fn clean_up_recent(recent_root: &Path, now: SystemTime) -> Result<HousekeepingReport> {
    let mut report = HousekeepingReport::default();
    if !recent_root.exists() {
        return Ok(report);
    }
    let cutoff = now
        .checked_sub(Duration::from_secs(RECENT_RETENTION_SECS as u64))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut pending = vec![recent_root.to_path_buf()];
    while let Some(path) = pending.pop() {
        if path.is_dir() {
            for entry in fs::read_dir(&path)? {
                pending.push(entry?.path());
            }
            continue;
        }

        let modified = fs::metadata(&path)?.modified()?;
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => report.deleted += 1,
                Err(e) => warn!("Could not delete {}: {}", path.display(), e),
            }
        } else if let Some(published) = promoted_name(&path) {
            match fs::rename(&path, &published) {
                Ok(()) => report.promoted += 1,
                Err(e) => warn!("Could not rename {}: {}", path.display(), e),
            }
        }
    }

    if report.deleted > 0 {
        info!("Deleted {} outdated files from {}", report.deleted, recent_root.display());
    }
    debug!("Published {} new mirror files", report.promoted);
    Ok(report)
}

fn promoted_name(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".tmp")?;
    Some(path.with_file_name(stem))
}

/// One sanitizing run: import, sanitize, write, prune secrets, clean up
use crate::housekeeping::{clean_up_recent, HousekeepingReport};
use crate::import::DescriptorImporter;
use bridgesan_common::{PublishedTime, RecordKind, Result, SanitizerConfig};
use bridgesan_core::{
    AddressAnonymizer, DescriptorSanitizer, PruneReport, SanitizedOutputWriter, SecretKeyStore,
    WriteOutcome,
};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Leave `.tmp` mirror files and old mirror files alone
    pub skip_housekeeping: bool,
}

/// Per-kind record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub stored: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub files: usize,
    pub unreadable_files: usize,
    pub counts: BTreeMap<RecordKind, KindCounts>,
    /// Records refused because the secret store was poisoned
    pub refused: usize,
    pub write_failures: usize,
    pub secrets_poisoned: bool,
    pub pruned: Option<PruneReport>,
    pub stale: Vec<(RecordKind, PublishedTime)>,
    pub housekeeping: Option<HousekeepingReport>,
}

impl RunSummary {
    pub fn counts(&self, kind: RecordKind) -> KindCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }
}

/// Run with the operating system's RNG, starting now
pub fn run_batch(config: &SanitizerConfig, options: RunOptions) -> Result<RunSummary> {
    run_batch_with(config, options, OsRng, Utc::now())
}

pub fn run_batch_with<R: RngCore + CryptoRng>(
    config: &SanitizerConfig,
    options: RunOptions,
    rng: R,
    started: DateTime<Utc>,
) -> Result<RunSummary> {
    let now = started.naive_utc();
    let cutoff = config.cutoff(now);
    let mut summary = RunSummary::default();

    let anonymizer = if config.replace_ip_addresses_with_hashes {
        let store = SecretKeyStore::load(&config.secrets_file, cutoff, rng);
        debug!("Read {} secrets for hashing bridge IP addresses.", store.len());
        AddressAnonymizer::hashing(store)
    } else {
        warn!("Replacing bridge addresses with placeholders, not with hashes");
        AddressAnonymizer::placeholder()
    };
    let mut sanitizer = DescriptorSanitizer::new(anonymizer, cutoff)
        .with_signature_verification(config.verify_identity_signatures);
    let writer = SanitizedOutputWriter::from_config(config, started);

    let report = DescriptorImporter::new(&config.input_dir).import_all()?;
    summary.files = report.files;
    summary.unreadable_files = report.problems.len();
    info!(
        "Imported {} records from {} files",
        report.records.len(),
        report.files
    );

    for raw in &report.records {
        let counts = summary.counts.entry(raw.kind).or_default();
        match sanitizer.sanitize(raw.kind, &raw.data, raw.publication_time) {
            Ok(record) => match writer.write(&record) {
                Ok(WriteOutcome::Stored) => counts.stored += 1,
                Ok(WriteOutcome::Duplicate) => counts.duplicates += 1,
                Err(e) => {
                    warn!("{}", e);
                    summary.write_failures += 1;
                }
            },
            Err(e) if e.is_run_fatal() => summary.refused += 1,
            Err(_) => counts.skipped += 1,
        }
    }

    summary.secrets_poisoned = sanitizer.anonymizer().is_poisoned();
    if summary.secrets_poisoned {
        warn!(
            "Problem with the bridge-ip-secrets file; refused to sanitize {} records \
             with addresses in this run",
            summary.refused
        );
    } else if let Some(store) = sanitizer.anonymizer_mut().secrets_mut() {
        match store.prune_older_than(&cutoff) {
            Ok(report) => summary.pruned = Some(report),
            Err(e) => warn!("Could not prune old secrets: {}", e),
        }
    }

    summary.stale = sanitizer.check_stale_descriptors(now);

    if !options.skip_housekeeping {
        summary.housekeeping = Some(clean_up_recent(writer.recent_root(), SystemTime::now())?);
    }

    for (kind, counts) in &summary.counts {
        info!(
            "Sanitized {}: {} stored, {} already archived, {} skipped",
            kind.category(),
            counts.stored,
            counts.duplicates,
            counts.skipped
        );
    }
    Ok(summary)
}

use super::MonthlySecret;
use bridgesan_common::limits::{FULL_SECRET_LEN, IPV4_SECRET_LEN};
use bridgesan_common::Month;
use chrono::NaiveDateTime;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Errors from the secret store
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret store is poisoned; not hashing any more addresses in this run")]
    Poisoned,

    #[error("Could not store new secret for {month}: {reason}")]
    PersistenceFailed { month: Month, reason: String },

    #[error("Could not rewrite secrets file: {0}")]
    Rewrite(#[from] io::Error),
}

/// Outcome of dropping secrets past the retention cutoff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: usize,
    pub deleted: usize,
}

/// Owner of all monthly secrets for one run
///
/// Every secret is appended to the secrets file before it is handed out, so
/// a crash can never leave behind pseudonyms whose key was lost. Once
/// anything goes wrong with the file the store is poisoned and refuses to
/// hand out secrets for the rest of the run.
pub struct SecretKeyStore<R> {
    path: PathBuf,
    cutoff: NaiveDateTime,
    secrets: BTreeMap<Month, MonthlySecret>,
    rng: R,
    poisoned: bool,
}

impl<R: RngCore + CryptoRng> SecretKeyStore<R> {
    /// Load persisted secrets from `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>, cutoff: NaiveDateTime, rng: R) -> Self {
        let mut store = Self {
            path: path.into(),
            cutoff,
            secrets: BTreeMap::new(),
            rng,
            poisoned: false,
        };

        match fs::read_to_string(&store.path) {
            Ok(contents) => {
                if let Err(reason) = store.read_lines(&contents) {
                    warn!(
                        "{} in {:?}! Not calculating any IP address hashes in this execution!",
                        reason, store.path
                    );
                    store.secrets.clear();
                    store.poisoned = true;
                } else {
                    debug!("Read {} secrets for hashing bridge IP addresses.", store.secrets.len());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No secrets file at {:?} yet", store.path);
            }
            Err(e) => {
                warn!(
                    "Failed to read {:?}: {}! Not calculating any IP address hashes in this execution!",
                    store.path, e
                );
                store.poisoned = true;
            }
        }

        store
    }

    fn read_lines(&mut self, contents: &str) -> Result<(), String> {
        for line in contents.lines() {
            let (month, secret) = parse_line(line)?;
            match self.secrets.get(&month) {
                Some(existing) if !existing.shares_prefix(&secret) => {
                    return Err(format!("Conflicting secrets for {}", month));
                }
                Some(existing) if existing.len() >= secret.len() => {}
                _ => {
                    self.secrets.insert(month, secret);
                }
            }
        }
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn cutoff(&self) -> &NaiveDateTime {
        &self.cutoff
    }

    /// Secret bytes for hashing IPv4 addresses of `month` (31 bytes)
    pub fn secret_for(&mut self, month: Month) -> Result<&[u8], SecretError> {
        let secret = self.ensure(month, IPV4_SECRET_LEN)?;
        Ok(secret.ipv4_part())
    }

    /// Full secret for `month` (50 bytes), extending a partial one if needed
    pub fn extend_for_ipv6(&mut self, month: Month) -> Result<&[u8], SecretError> {
        let secret = self.ensure(month, FULL_SECRET_LEN)?;
        Ok(secret.as_bytes())
    }

    fn ensure(&mut self, month: Month, len: usize) -> Result<&MonthlySecret, SecretError> {
        if self.poisoned {
            return Err(SecretError::Poisoned);
        }

        let known = self.secrets.get(&month).map_or(0, MonthlySecret::len);
        if known < len {
            let mut bytes = self
                .secrets
                .get(&month)
                .map(|existing| existing.as_bytes().to_vec())
                .unwrap_or_default();
            let start = bytes.len();
            bytes.resize(len, 0);
            self.rng.fill_bytes(&mut bytes[start..]);
            let secret = MonthlySecret::from_bytes(bytes).ok_or(SecretError::Poisoned)?;

            if month.is_past(&self.cutoff) {
                warn!(
                    "Generated a secret for {} that we won't make persistent, because it's \
                     outside our bridge descriptor sanitizing interval.",
                    month
                );
            } else if let Err(e) = self.persist(&month, &secret) {
                warn!(
                    "Could not store new secret to disk! Not calculating any IP address \
                     hashes in this execution! ({})",
                    e
                );
                self.poisoned = true;
                return Err(SecretError::PersistenceFailed {
                    month,
                    reason: e.to_string(),
                });
            } else {
                debug!("Stored {}-byte secret for {}", secret.len(), month);
            }
            self.secrets.insert(month, secret);
        }

        self.secrets.get(&month).ok_or(SecretError::Poisoned)
    }

    /// Append one secret to the file and make sure it hit the disk
    fn persist(&self, month: &Month, secret: &MonthlySecret) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", secret.to_line(month))?;
        file.sync_all()
    }

    /// Forget secrets for months before `cutoff` and rewrite the file with the rest
    pub fn prune_older_than(&mut self, cutoff: &NaiveDateTime) -> Result<PruneReport, SecretError> {
        if self.poisoned {
            return Err(SecretError::Poisoned);
        }
        let deleted = self.secrets.keys().filter(|m| m.is_past(cutoff)).count();
        let kept = self.secrets.len() - deleted;
        if deleted == 0 {
            return Ok(PruneReport { kept, deleted });
        }

        let contents: String = self
            .secrets
            .iter()
            .filter(|(month, _)| !month.is_past(cutoff))
            .map(|(month, secret)| secret.to_line(month) + "\n")
            .collect();
        if let Err(e) = rewrite(&self.path, contents.as_bytes()) {
            warn!(
                "Could not store reduced set of secrets to disk! This is a bad sign, \
                 better check what's going on! ({})",
                e
            );
            return Err(e.into());
        }

        self.secrets.retain(|month, _| !month.is_past(cutoff));
        info!(
            "Deleted {} secrets that we don't need anymore and kept {}.",
            deleted, kept
        );
        Ok(PruneReport { kept, deleted })
    }
}

fn parse_line(line: &str) -> Result<(Month, MonthlySecret), String> {
    let prefix: String = line.chars().take(7).collect();
    let invalid = || format!("Invalid line in bridge-ip-secrets file starting with '{}'", prefix);

    let valid_len = line.len() == "yyyy-MM,".len() + IPV4_SECRET_LEN * 2
        || line.len() == "yyyy-MM,".len() + FULL_SECRET_LEN * 2;
    let (month, secret_hex) = line.split_once(',').ok_or_else(invalid)?;
    if !valid_len || secret_hex.contains(',') {
        return Err(invalid());
    }
    let month: Month = month.parse().map_err(|_| invalid())?;
    let bytes = hex::decode(secret_hex).map_err(|_| invalid())?;
    let secret = MonthlySecret::from_bytes(bytes).ok_or_else(invalid)?;
    Ok((month, secret))
}

fn rewrite(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

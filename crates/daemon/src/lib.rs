/// Bridge sanitizer runner library
///
/// Imports raw bridge descriptors from disk, sanitizes them with
/// `bridgesan-core` and maintains the recent mirror.

pub mod housekeeping;
pub mod import;
pub mod runner;

pub use housekeeping::{clean_up_recent, HousekeepingReport};
pub use import::{DescriptorImporter, ImportReport, RawRecord};
pub use runner::{run_batch, run_batch_with, KindCounts, RunOptions, RunSummary};

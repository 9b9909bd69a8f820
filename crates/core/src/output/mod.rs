/// Sanitized output storage
///
/// Every record goes to a permanent archive, keyed by digest or publication
/// time, and to a recent-activity mirror that downstream consumers sync.

mod writer;

pub use writer::{batch_id, SanitizedOutputWriter, WriteError, WriteOutcome, BATCH_ID_FORMAT};

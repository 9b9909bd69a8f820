/// Monthly secrets keying the address hashes
///
/// One secret per calendar month, persisted before first use and dropped
/// once the month falls out of the retention window.

mod secret;
mod store;

pub use secret::MonthlySecret;
pub use store::{PruneReport, SecretError, SecretKeyStore};

//! Pure reconciliation algorithms: the payment-to-registration matcher, the
//! field-level differential syncer, and ticket-ownership integrity checks.
//!
//! Everything here is a total, synchronous function over in-memory records.
//! All I/O (fetching candidates, persisting proposals) belongs to the caller.

pub mod diff;
pub mod integrity;
pub mod matcher;

pub use diff::{diff_fields, DEFAULT_METADATA_KEYS};
pub use integrity::{ticket_ownership_defects, OwnershipDefect};
pub use matcher::{
    certain_match, match_payment, verify_stored_match, MatchCriterion, MatchEvidence,
    MatchOutcome, MatchResult, MatchWeights, CERTAIN_CONFIDENCE,
};

pub const CRATE_NAME: &str = "ltx-recon";

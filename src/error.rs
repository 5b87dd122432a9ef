//! Configuration- and programmer-error taxonomy for the consensus engine.
//!
//! Adversarial-input errors (bad signatures, unknown voters, duplicate votes)
//! are *not* represented here: per the observe_proposal/observe_vote contract
//! they are dropped silently and reported only through the absence of a
//! return value, never through this enum.

use thiserror::Error;

/// Fatal initialization failures and safety-margin warnings surfaced at
/// replica or network construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("roster must contain at least one voter")]
    EmptyRoster,

    #[error("node `{node_id}` is missing from its own public-key roster")]
    MissingSelfKey { node_id: String },

    #[error("public key for voter `{voter_id}` is not a valid Ed25519 point")]
    InvalidPublicKey { voter_id: String },

    #[error("roster size n={n} does not satisfy n >= 3f+1 for f={f}; safety is not guaranteed")]
    InsufficientTolerance { n: usize, f: usize },
}

//! Streamlet-style Byzantine-fault-tolerant consensus engine.
//!
//! Drives replicated agreement on an append-only chain of blocks among a
//! fixed set of signing participants, under a partially synchronous,
//! all-honest-majority (`n >= 3f+1`) assumption. The engine is
//! payload-agnostic: block payloads are opaque byte strings, and nothing
//! here interprets them.
//!
//! The crate factors into four pieces, leaves-first:
//! - [`identity`] — Ed25519 keypairs, canonical sign/verify.
//! - [`block`] — immutable block/vote/notarization records and the
//!   content-addressed block hash.
//! - [`replica`] — the per-node state machine enforcing the
//!   proposal/voting/notarization/finalization rules.
//! - [`network`] — a synchronous reference driver used to exercise
//!   multiple replicas together; real deployments replace it with an
//!   actual transport.

pub mod block;
pub mod error;
pub mod identity;
pub mod network;
pub mod replica;

pub use block::{Block, BlockHash, Notarization, Vote};
pub use error::ConsensusError;
pub use identity::KeyPair;
pub use network::Network;
pub use replica::{leader_for_epoch, Replica};

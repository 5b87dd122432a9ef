//! Block and vote data model (DM): immutable block records with a
//! deterministic content hash, and the vote/notarization records tied to
//! them. Nothing here is mutated once constructed; the replica state
//! machine (`crate::replica`) is the only thing that grows over time.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::{Digest, Sha256};

/// The literal string hashed in place of a real parent when a block's
/// parent is the implicit, never-materialized `GENESIS` root.
const GENESIS_LABEL: &str = "GENESIS";

/// A SHA-256 content digest identifying a `Block`. Two blocks with
/// identical fields collide intentionally and are the same block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.as_hex())
    }
}

/// An immutable block. `parent_hash` of `None` denotes the implicit
/// `GENESIS` root; it is never stored as a block in its own right but is a
/// legal parent reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub parent_hash: Option<BlockHash>,
    pub epoch: u64,
    pub proposer_id: String,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(
        parent_hash: Option<BlockHash>,
        epoch: u64,
        proposer_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Block {
            parent_hash,
            epoch,
            proposer_id: proposer_id.into(),
            payload,
        }
    }

    /// `H(parent_hash ‖ epoch_be64 ‖ proposer_id ‖ payload)`, a pure
    /// function of the block's fields. `parent_hash` is hashed as its
    /// lowercase-hex rendering (or the literal `"GENESIS"`), matching the
    /// canonical wire encoding in the external interfaces section.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        match &self.parent_hash {
            Some(h) => hasher.update(h.as_hex().as_bytes()),
            None => hasher.update(GENESIS_LABEL.as_bytes()),
        }
        hasher.update(self.epoch.to_be_bytes());
        hasher.update(self.proposer_id.as_bytes());
        hasher.update(&self.payload);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        BlockHash(bytes)
    }
}

/// A signed endorsement of one block in one epoch. The signed message is
/// the UTF-8 string `"{block_hash}:{epoch}:{voter_id}"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub block_hash: BlockHash,
    pub epoch: u64,
    pub voter_id: String,
    // serde only has blanket array impls up to 32 elements; a 64-byte
    // Ed25519 signature needs the big-array shim to (de)serialize.
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl Vote {
    /// The exact byte string a voter signs and a verifier re-derives.
    pub fn signed_message(block_hash: &BlockHash, epoch: u64, voter_id: &str) -> Vec<u8> {
        format!("{}:{}:{}", block_hash.as_hex(), epoch, voter_id).into_bytes()
    }
}

/// Accumulated evidence that a block has a quorum of votes: the set of
/// distinct voter identifiers whose valid votes for this block have been
/// observed so far.
#[derive(Clone, Debug)]
pub struct Notarization {
    pub block_hash: BlockHash,
    pub epoch: u64,
    pub voters: std::collections::HashSet<String>,
}

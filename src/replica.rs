//! Per-node replica state machine (RSM): the local view of blocks,
//! parentage, seen votes, notarizations, and the finalized set, together
//! with the proposal/voting/notarization/finalization rules. Stateful and
//! single-threaded: concurrent calls into one replica are not permitted
//! without external synchronization (see §5 of the design).

use std::collections::{HashMap, HashSet};

use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::block::{Block, BlockHash, Notarization, Vote};
use crate::error::ConsensusError;
use crate::identity;

/// Deterministic round-robin leader selection: `roster[epoch mod n]`.
/// `roster` is the network's fixed iteration order; every replica must be
/// called with the same order to derive leaders identically.
pub fn leader_for_epoch<'a>(epoch: u64, roster: &'a [String]) -> &'a str {
    &roster[(epoch as usize) % roster.len()]
}

/// One participant's local view of the chain and the consensus rules that
/// govern it.
pub struct Replica {
    node_id: String,
    signing_key: SigningKey,
    public_keys: HashMap<String, VerifyingKey>,
    f: usize,

    blocks: HashMap<BlockHash, Block>,
    parent_of: HashMap<BlockHash, Option<BlockHash>>,
    votes_seen: HashMap<(BlockHash, String), Vote>,
    notarizations: HashMap<BlockHash, Notarization>,
    notarized_blocks: HashSet<BlockHash>,
    finalized: HashSet<BlockHash>,
}

impl Replica {
    /// Constructs a replica. Fails if the roster is empty or does not
    /// include `node_id`'s own key. Does not reject `n < 3f+1`; it only
    /// logs a warning, matching the spec's "not checked but voids the
    /// safety argument" stance. Use [`Replica::new_strict`] to make that a
    /// hard error instead.
    pub fn new(
        node_id: impl Into<String>,
        signing_key: SigningKey,
        public_keys: HashMap<String, VerifyingKey>,
        f: usize,
    ) -> Result<Self, ConsensusError> {
        Self::construct(node_id.into(), signing_key, public_keys, f, false)
    }

    /// Like [`Replica::new`], but rejects a roster that does not satisfy
    /// `n >= 3f+1` instead of merely warning.
    pub fn new_strict(
        node_id: impl Into<String>,
        signing_key: SigningKey,
        public_keys: HashMap<String, VerifyingKey>,
        f: usize,
    ) -> Result<Self, ConsensusError> {
        Self::construct(node_id.into(), signing_key, public_keys, f, true)
    }

    /// Like [`Replica::new`], but takes the roster as raw 32-byte Ed25519
    /// public-key encodings (e.g. received over a wire) instead of already
    /// decoded keys. A malformed encoding is a configuration-time failure,
    /// reported as [`ConsensusError::InvalidPublicKey`], not silently
    /// dropped the way a bad vote signature would be.
    pub fn new_from_encoded_keys(
        node_id: impl Into<String>,
        signing_key: SigningKey,
        encoded_public_keys: HashMap<String, [u8; 32]>,
        f: usize,
    ) -> Result<Self, ConsensusError> {
        let mut public_keys = HashMap::with_capacity(encoded_public_keys.len());
        for (voter_id, bytes) in encoded_public_keys {
            let key = identity::deserialize_public_key(&bytes)
                .map_err(|_| ConsensusError::InvalidPublicKey { voter_id: voter_id.clone() })?;
            public_keys.insert(voter_id, key);
        }
        Self::new(node_id, signing_key, public_keys, f)
    }

    fn construct(
        node_id: String,
        signing_key: SigningKey,
        public_keys: HashMap<String, VerifyingKey>,
        f: usize,
        strict: bool,
    ) -> Result<Self, ConsensusError> {
        if public_keys.is_empty() {
            return Err(ConsensusError::EmptyRoster);
        }
        if !public_keys.contains_key(&node_id) {
            return Err(ConsensusError::MissingSelfKey { node_id });
        }
        let n = public_keys.len();
        if n < 3 * f + 1 {
            if strict {
                return Err(ConsensusError::InsufficientTolerance { n, f });
            }
            tracing::warn!(n, f, "roster does not satisfy n >= 3f+1; safety is not guaranteed");
        }
        Ok(Replica {
            node_id,
            signing_key,
            public_keys,
            f,
            blocks: HashMap::new(),
            parent_of: HashMap::new(),
            votes_seen: HashMap::new(),
            notarizations: HashMap::new(),
            notarized_blocks: HashSet::new(),
            finalized: HashSet::new(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn notarized_blocks(&self) -> &HashSet<BlockHash> {
        &self.notarized_blocks
    }

    pub fn finalized(&self) -> &HashSet<BlockHash> {
        &self.finalized
    }

    pub fn notarizations(&self) -> &HashMap<BlockHash, Notarization> {
        &self.notarizations
    }

    pub fn blocks(&self) -> &HashMap<BlockHash, Block> {
        &self.blocks
    }

    fn quorum(&self) -> usize {
        2 * self.f + 1
    }

    /// All tips of the longest chain(s) of notarized blocks currently in
    /// this replica's view, walking `parent_of` back to `GENESIS`. A chain
    /// that does not bottom out cleanly (a dangling reference to a block
    /// this replica never learned) is disqualified. Ties are broken by
    /// lexicographically smallest hash, a stable choice rather than the
    /// insertion-order accident of the reference implementation.
    fn longest_notarized_tips(&self) -> Vec<BlockHash> {
        let mut max_len = 0usize;
        let mut tips: Vec<BlockHash> = Vec::new();

        for tip in &self.notarized_blocks {
            let mut len = 0usize;
            let mut cur = Some(*tip);
            let mut reached_genesis = false;

            while let Some(h) = cur {
                if !self.blocks.contains_key(&h) {
                    break;
                }
                len += 1;
                match self.parent_of.get(&h) {
                    Some(Some(parent)) => cur = Some(*parent),
                    Some(None) => {
                        reached_genesis = true;
                        cur = None;
                    }
                    None => {
                        cur = None;
                    }
                }
            }

            if reached_genesis {
                if len > max_len {
                    max_len = len;
                    tips.clear();
                    tips.push(*tip);
                } else if len == max_len {
                    tips.push(*tip);
                }
            }
        }

        tips.sort();
        tips
    }

    /// Whether a prior vote was already cast for some block in `epoch`.
    fn already_voted_in_epoch(&self, epoch: u64) -> bool {
        self.votes_seen.keys().any(|(block_hash, voter_id)| {
            voter_id == &self.node_id
                && self
                    .blocks
                    .get(block_hash)
                    .map(|b| b.epoch == epoch)
                    .unwrap_or(false)
        })
    }

    /// The voting rule of §4.2.2: vote for the first proposal seen in an
    /// epoch that extends one of the longest notarized chains in view, or,
    /// before any chain has been notarized, any proposal that extends
    /// `GENESIS` or an as-yet-unseen parent (the bootstrap concession).
    fn can_vote_for(&self, block: &Block) -> bool {
        if self.already_voted_in_epoch(block.epoch) {
            return false;
        }

        let tips = self.longest_notarized_tips();
        if tips.is_empty() {
            return match &block.parent_hash {
                None => true,
                Some(parent) => !self.blocks.contains_key(parent),
            };
        }

        match &block.parent_hash {
            Some(parent) => tips.contains(parent),
            None => false,
        }
    }

    /// If this replica is the leader of `epoch` (per `roster`), builds a
    /// block extending a locally-chosen longest notarized chain tip.
    /// Returns nothing for non-leaders. Does not itself emit a vote — the
    /// proposer's own vote is produced when the harness delivers the
    /// proposal back to it through [`Replica::observe_proposal`].
    pub fn propose(&mut self, epoch: u64, roster: &[String], payload: Vec<u8>) -> Option<Block> {
        if leader_for_epoch(epoch, roster) != self.node_id {
            return None;
        }

        let tips = self.longest_notarized_tips();
        let parent_hash = tips.first().copied();
        let block = Block::new(parent_hash, epoch, self.node_id.clone(), payload);
        let block_hash = block.hash();

        self.blocks.insert(block_hash, block.clone());
        self.parent_of.insert(block_hash, parent_hash);

        tracing::info!(
            node_id = %self.node_id,
            epoch,
            block_hash = %block_hash,
            "proposed block"
        );
        Some(block)
    }

    fn sign_vote(&self, block_hash: BlockHash, epoch: u64) -> Vote {
        let message = Vote::signed_message(&block_hash, epoch, &self.node_id);
        let signature = identity::sign(&self.signing_key, &message);
        Vote {
            block_hash,
            epoch,
            voter_id: self.node_id.clone(),
            signature,
        }
    }

    /// Records `block` locally and, if the voting rule permits, emits a
    /// signed vote for it. Idempotent: re-invoking with a block this
    /// replica already holds returns no vote if one was already cast for
    /// that epoch.
    pub fn observe_proposal(&mut self, block: Block) -> Option<Vote> {
        let block_hash = block.hash();
        self.blocks.entry(block_hash).or_insert_with(|| block.clone());
        self.parent_of.entry(block_hash).or_insert(block.parent_hash);

        tracing::debug!(
            node_id = %self.node_id,
            epoch = block.epoch,
            block_hash = %block_hash,
            "observed proposal"
        );

        if !self.can_vote_for(&block) {
            return None;
        }

        let vote = self.sign_vote(block_hash, block.epoch);
        self.votes_seen
            .insert((block_hash, self.node_id.clone()), vote.clone());

        tracing::info!(
            node_id = %self.node_id,
            epoch = block.epoch,
            block_hash = %block_hash,
            "voted"
        );
        Some(vote)
    }

    /// Verifies and records `vote`. Drops it silently if the voter is
    /// unknown, the signature is invalid, or this (block, voter) pair was
    /// already recorded. Returns the notarization the instant quorum is
    /// first crossed for this block, after attempting finalization.
    pub fn observe_vote(&mut self, vote: Vote) -> Option<Notarization> {
        let public_key = match self.public_keys.get(&vote.voter_id) {
            Some(pk) => pk,
            None => {
                tracing::debug!(voter_id = %vote.voter_id, "dropping vote from unknown voter");
                return None;
            }
        };

        let message = Vote::signed_message(&vote.block_hash, vote.epoch, &vote.voter_id);
        if !identity::verify(public_key, &message, &vote.signature) {
            tracing::debug!(voter_id = %vote.voter_id, "dropping vote with invalid signature");
            return None;
        }

        let key = (vote.block_hash, vote.voter_id.clone());
        if self.votes_seen.contains_key(&key) {
            return None;
        }
        self.votes_seen.insert(key, vote.clone());

        let quorum = self.quorum();
        let voters_len = {
            let notarization = self
                .notarizations
                .entry(vote.block_hash)
                .or_insert_with(|| Notarization {
                    block_hash: vote.block_hash,
                    epoch: vote.epoch,
                    voters: HashSet::new(),
                });
            notarization.voters.insert(vote.voter_id);
            notarization.voters.len()
        };

        if voters_len >= quorum && !self.notarized_blocks.contains(&vote.block_hash) {
            self.notarized_blocks.insert(vote.block_hash);
            let result = self
                .notarizations
                .get(&vote.block_hash)
                .cloned()
                .expect("just inserted above");
            tracing::info!(
                node_id = %self.node_id,
                epoch = vote.epoch,
                block_hash = %vote.block_hash,
                voters = result.voters.len(),
                "block notarized"
            );
            self.try_finalize(vote.block_hash);
            return Some(result);
        }

        None
    }

    /// Walks back from a newly-notarized tip three notarized blocks; if
    /// their epochs are exactly consecutive, finalizes the middle block and
    /// recursively finalizes its ancestors. A missing parent anywhere in
    /// the walk aborts finalization silently.
    fn try_finalize(&mut self, tip_hash: BlockHash) {
        let mut chain: Vec<BlockHash> = Vec::with_capacity(3);
        let mut cur = Some(tip_hash);

        while chain.len() < 3 {
            let Some(h) = cur else { break };
            if !self.blocks.contains_key(&h) {
                break;
            }
            if !self.notarized_blocks.contains(&h) {
                return;
            }
            chain.push(h);
            cur = self.parent_of.get(&h).copied().flatten();
        }

        if chain.len() < 3 {
            return;
        }

        let (b3, b2, b1) = (chain[0], chain[1], chain[2]);
        let e3 = self.blocks[&b3].epoch;
        let e2 = self.blocks[&b2].epoch;
        let e1 = self.blocks[&b1].epoch;

        if e3 == e2 + 1 && e2 == e1 + 1 {
            self.finalize_from(b2);
        }
    }

    fn finalize_from(&mut self, start: BlockHash) {
        let mut cur = Some(start);
        while let Some(h) = cur {
            let Some(block) = self.blocks.get(&h) else {
                break;
            };
            if !self.finalized.insert(h) {
                break;
            }
            tracing::info!(node_id = %self.node_id, block_hash = %h, "finalized");
            cur = block.parent_hash;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn make_replica(
        node_id: &str,
        keys: &HashMap<String, (SigningKey, VerifyingKey)>,
        f: usize,
    ) -> Replica {
        let public_keys = keys.iter().map(|(id, (_, pk))| (id.clone(), *pk)).collect();
        Replica::new(node_id, keys[node_id].0.clone(), public_keys, f).unwrap()
    }

    fn make_keys(ids: &[&str]) -> HashMap<String, (SigningKey, VerifyingKey)> {
        let mut rng = StdRng::from_seed([42u8; 32]);
        ids.iter()
            .map(|id| {
                let kp = identity::KeyPair::generate(&mut rng);
                (id.to_string(), (kp.signing_key, kp.verifying_key))
            })
            .collect()
    }

    #[test]
    fn non_leader_does_not_propose() {
        let ids = roster(&["n1", "n2", "n3", "n4"]);
        let keys = make_keys(&["n1", "n2", "n3", "n4"]);
        let mut n2 = make_replica("n2", &keys, 1);
        assert!(n2.propose(0, &ids, b"tx0".to_vec()).is_none());
        assert!(n2.blocks().is_empty());
    }

    #[test]
    fn leader_proposes_extending_genesis() {
        let ids = roster(&["n1", "n2", "n3", "n4"]);
        let keys = make_keys(&["n1", "n2", "n3", "n4"]);
        let mut n1 = make_replica("n1", &keys, 1);
        let block = n1.propose(0, &ids, b"tx0".to_vec()).unwrap();
        assert_eq!(block.parent_hash, None);
        assert_eq!(block.proposer_id, "n1");
    }

    #[test]
    fn duplicate_vote_is_a_no_op() {
        let ids = roster(&["n1", "n2", "n3", "n4"]);
        let keys = make_keys(&["n1", "n2", "n3", "n4"]);
        let mut n1 = make_replica("n1", &keys, 1);
        let block = n1.propose(0, &ids, b"tx0".to_vec()).unwrap();
        let vote = n1.observe_proposal(block).unwrap();

        assert!(n1.observe_vote(vote.clone()).is_none());
        let voters_after_first = n1.notarizations()[&vote.block_hash].voters.len();
        assert!(n1.observe_vote(vote).is_none());
        let voters_after_second = n1.notarizations()[&vote.block_hash].voters.len();
        assert_eq!(voters_after_first, voters_after_second);
    }

    #[test]
    fn forged_vote_is_dropped() {
        let ids = roster(&["n1", "n2", "n3", "n4"]);
        let keys = make_keys(&["n1", "n2", "n3", "n4"]);
        let mut n1 = make_replica("n1", &keys, 1);
        let block = n1.propose(0, &ids, b"tx0".to_vec()).unwrap();
        let mut vote = n1.observe_proposal(block).unwrap();
        vote.voter_id = "n2".to_string();
        // signature was produced by n1's key, not n2's: must fail verification.
        assert!(n1.observe_vote(vote).is_none());
        assert!(n1.notarizations().is_empty());
    }

    #[test]
    fn malformed_encoded_public_key_is_a_configuration_error() {
        let keys = make_keys(&["n1", "n2", "n3", "n4"]);
        let mut encoded: HashMap<String, [u8; 32]> = keys
            .iter()
            .map(|(id, (_, pk))| (id.clone(), identity::serialize_public_key(pk)))
            .collect();
        encoded.insert("n2".to_string(), [0xffu8; 32]);

        let err = Replica::new_from_encoded_keys("n1", keys["n1"].0.clone(), encoded, 1)
            .unwrap_err();
        assert_eq!(err, ConsensusError::InvalidPublicKey { voter_id: "n2".to_string() });
    }

    #[test]
    fn second_proposal_in_same_epoch_yields_no_additional_vote() {
        let ids = roster(&["n1", "n2", "n3", "n4"]);
        let keys = make_keys(&["n1", "n2", "n3", "n4"]);
        let mut n1 = make_replica("n1", &keys, 1);
        let block = n1.propose(0, &ids, b"tx0".to_vec()).unwrap();
        assert!(n1.observe_proposal(block.clone()).is_some());
        assert!(n1.observe_proposal(block).is_none());
    }
}

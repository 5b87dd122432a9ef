//! Cryptographic identity: Ed25519 keypairs and canonical sign/verify over
//! raw byte strings. See §4.1 of the design: verification failures are
//! reported as `bool`, never as an error, so callers can drop forged votes
//! without plumbing a `Result` through the replica state machine.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;

/// An Ed25519 signing/verifying pair for one participant.
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generates a fresh keypair from the supplied CSPRNG. Callers that need
    /// reproducible test networks should pass a seeded `rand::rngs::StdRng`
    /// rather than `OsRng`.
    pub fn generate<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let verifying_key = signing_key.verifying_key();
        KeyPair {
            signing_key,
            verifying_key,
        }
    }

    /// Signs `message` under this keypair's signing key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        sign(&self.signing_key, message)
    }
}

/// Signs `message` under `signing_key`.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; 64] {
    signing_key.sign(message).to_bytes()
}

/// Verifies `signature` over `message` under `public_key`. Never panics:
/// any cryptographic failure (bad signature, malformed encoding) returns
/// `false`.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &[u8; 64]) -> bool {
    let signature = Signature::from_bytes(signature);
    public_key.verify(message, &signature).is_ok()
}

/// Raw 32-byte Ed25519 public-key encoding.
pub fn serialize_public_key(public_key: &VerifyingKey) -> [u8; 32] {
    public_key.to_bytes()
}

/// Decodes a raw 32-byte Ed25519 public key. Returns an error if the bytes
/// do not encode a valid curve point; this is a configuration-time failure,
/// not an adversarial-input one, so callers are expected to map it into
/// `ConsensusError::InvalidPublicKey` with the voter's identity attached.
pub fn deserialize_public_key(bytes: &[u8; 32]) -> Result<VerifyingKey, ed25519_dalek::SignatureError> {
    VerifyingKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn verify_accepts_genuine_signature() {
        let mut rng = StdRng::from_seed([7u8; 32]);
        let kp = KeyPair::generate(&mut rng);
        let msg = b"abc:0:n1";
        let sig = kp.sign(msg);
        assert!(verify(&kp.verifying_key, msg, &sig));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let mut rng = StdRng::from_seed([7u8; 32]);
        let kp = KeyPair::generate(&mut rng);
        let sig = kp.sign(b"abc:0:n1");
        assert!(!verify(&kp.verifying_key, b"abc:0:n2", &sig));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let mut rng = StdRng::from_seed([7u8; 32]);
        let kp = KeyPair::generate(&mut rng);
        let msg = b"abc:0:n1";
        let mut sig = kp.sign(msg);
        sig[0] ^= 0xff;
        assert!(!verify(&kp.verifying_key, msg, &sig));
    }

    #[test]
    fn public_key_round_trips() {
        let mut rng = StdRng::from_seed([3u8; 32]);
        let kp = KeyPair::generate(&mut rng);
        let bytes = serialize_public_key(&kp.verifying_key);
        let decoded = deserialize_public_key(&bytes).unwrap();
        assert_eq!(decoded, kp.verifying_key);
    }

    #[test]
    fn deserialize_rejects_malformed_point() {
        // The all-0xff string is not a valid compressed Edwards point.
        let bytes = [0xffu8; 32];
        assert!(deserialize_public_key(&bytes).is_err());
    }
}

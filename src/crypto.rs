//! Reference signature-verifier collaborator.
//!
//! The core treats signature verification as an injected capability (see
//! [`crate::utxo::SignatureVerifier`]); this module provides a concrete
//! secp256k1-backed implementation so the crate is runnable stand-alone,
//! plus a placeholder that always accepts, for callers that haven't wired
//! up real keys yet. Swapping between the two never changes core behavior,
//! only which UTXOs are actually spendable.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

use crate::utxo::SignatureVerifier;

/// Verifies ECDSA signatures over `SHA256(msg)` using secp256k1, ignoring
/// `owner` (the core does not specify how owner addresses derive from
/// public keys; that policy lives above this collaborator).
pub struct Secp256k1Verifier {
    engine: Secp256k1<secp256k1::VerifyOnly>,
}

impl Secp256k1Verifier {
    pub fn new() -> Self {
        Secp256k1Verifier {
            engine: Secp256k1::verification_only(),
        }
    }
}

impl Default for Secp256k1Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, _owner: &str, pubkey: &[u8], sig: &[u8], msg: &str) -> bool {
        let Ok(public_key) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Ok(signature) = Signature::from_der(sig).or_else(|_| Signature::from_compact(sig)) else {
            return false;
        };
        let digest: [u8; 32] = Sha256::digest(msg.as_bytes()).into();
        let Ok(message) = Message::from_digest_slice(&digest) else {
            return false;
        };
        self.engine.verify_ecdsa(&message, &signature, &public_key).is_ok()
    }
}

/// Accepts every spend. Matches the reference behavior noted in the UTXO
/// component: a placeholder that exposes the hook without enforcing it.
pub struct PermissiveVerifier;

impl SignatureVerifier for PermissiveVerifier {
    fn verify(&self, _owner: &str, _pubkey: &[u8], _sig: &[u8], _msg: &str) -> bool {
        true
    }
}

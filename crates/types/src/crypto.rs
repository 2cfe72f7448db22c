//! ECDSA keys and signatures over secp256k1.
//!
//! Validators are identified by their compressed public key ([`NodeKey`]).
//! Signatures are recoverable: the 65-byte wire form carries the recovery id,
//! so transaction signers can be recovered from the hash-to-sign without an
//! explicit key field.

use crate::Hash;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1, SecretKey};
use std::fmt;

/// Errors from key handling and signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature recovery failed")]
    RecoveryFailed,
}

/// A validator identity: a 33-byte compressed secp256k1 public key.
///
/// Equality and ordering are over the key bytes, which makes every
/// `BTreeMap<NodeKey, _>` iterate in the canonical validator order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey([u8; 33]);

impl NodeKey {
    /// Wrap raw compressed-key bytes, validating the encoding.
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        secp256k1::PublicKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(NodeKey(bytes))
    }

    /// The compressed key bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Verify a signature over the given hash.
    pub fn verify(&self, hash: &Hash, signature: &Signature) -> bool {
        let secp = Secp256k1::verification_only();
        let Ok(msg) = Message::from_digest_slice(hash.as_bytes()) else {
            return false;
        };
        let Ok(sig) = signature.to_recoverable() else {
            return false;
        };
        let Ok(pk) = secp256k1::PublicKey::from_slice(&self.0) else {
            return false;
        };
        secp.verify_ecdsa(&msg, &sig.to_standard(), &pk).is_ok()
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", hex::encode(&self.0[..5]))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", hex::encode(&self.0[..5]))
    }
}

/// A recoverable ECDSA signature: 64 bytes of (r, s) plus a recovery id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    rs: [u8; 64],
    recovery_id: u8,
}

impl Signature {
    /// Reconstruct from the 65-byte wire form (`r || s || recovery_id`).
    pub fn from_bytes(bytes: &[u8; 65]) -> Result<Self, CryptoError> {
        let sig = Signature {
            rs: bytes[..64].try_into().expect("slice of fixed length"),
            recovery_id: bytes[64],
        };
        sig.to_recoverable()?;
        Ok(sig)
    }

    /// Serialize to the 65-byte wire form.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&self.rs);
        out[64] = self.recovery_id;
        out
    }

    /// Recover the signer of `hash`.
    pub fn recover(&self, hash: &Hash) -> Result<NodeKey, CryptoError> {
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(hash.as_bytes())
            .map_err(|_| CryptoError::RecoveryFailed)?;
        let sig = self.to_recoverable()?;
        let pk = secp
            .recover_ecdsa(&msg, &sig)
            .map_err(|_| CryptoError::RecoveryFailed)?;
        Ok(NodeKey(pk.serialize()))
    }

    fn to_recoverable(&self) -> Result<RecoverableSignature, CryptoError> {
        let id = RecoveryId::from_i32(i32::from(self.recovery_id))
            .map_err(|_| CryptoError::InvalidSignature)?;
        RecoverableSignature::from_compact(&self.rs, id)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig({}..)", hex::encode(&self.rs[..4]))
    }
}

/// A signing keypair.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    node_key: NodeKey,
}

impl KeyPair {
    /// Derive a keypair from 32 seed bytes (the seed is the secret scalar).
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(seed).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
        Ok(KeyPair {
            secret,
            node_key: NodeKey(public.serialize()),
        })
    }

    /// This keypair's public identity.
    pub fn node_key(&self) -> NodeKey {
        self.node_key
    }

    /// Sign a 32-byte hash. Deterministic (RFC 6979).
    pub fn sign(&self, hash: &Hash) -> Signature {
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(hash.as_bytes())
            .expect("hash is always 32 bytes");
        let sig = secp.sign_ecdsa_recoverable(&msg, &self.secret);
        let (id, rs) = sig.serialize_compact();
        Signature {
            rs,
            recovery_id: id.to_i32() as u8,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("node_key", &self.node_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> KeyPair {
        let mut bytes = [seed; 32];
        bytes[0] = 1;
        KeyPair::from_seed(&bytes).unwrap()
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = keypair(7);
        let hash = Hash::sha256(b"payload");
        let sig = kp.sign(&hash);
        assert!(kp.node_key().verify(&hash, &sig));
    }

    #[test]
    fn recovers_signer() {
        let kp = keypair(9);
        let hash = Hash::sha256_twice(b"recover me");
        let sig = kp.sign(&hash);
        assert_eq!(sig.recover(&hash).unwrap(), kp.node_key());
    }

    #[test]
    fn rejects_wrong_key() {
        let hash = Hash::sha256(b"payload");
        let sig = keypair(7).sign(&hash);
        assert!(!keypair(8).node_key().verify(&hash, &sig));
    }

    #[test]
    fn signature_wire_round_trip() {
        let sig = keypair(3).sign(&Hash::sha256(b"x"));
        let restored = Signature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(sig, restored);
    }

    #[test]
    fn deterministic_signatures() {
        let kp = keypair(4);
        let hash = Hash::sha256(b"rfc6979");
        assert_eq!(kp.sign(&hash), kp.sign(&hash));
    }
}

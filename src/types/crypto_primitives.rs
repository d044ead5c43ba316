/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use borsh::BorshSerialize;

use super::data_types::{CryptoHash, PublicKeyBytes, SignatureBytes, ValidatorID};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as getters for the [`public`](Self::public) key and the [`validator_id`](Self::validator_id)
/// associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the raw bytes of the `VerifyingKey` of this `Keypair`.
    pub fn public_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes::new(self.0.verifying_key().to_bytes())
    }

    /// Get the identity this keypair votes and proposes under.
    pub fn validator_id(&self) -> ValidatorID {
        validator_id(&self.public_bytes())
    }
}

/// Compute the SHA256 hash of the Borsh serialization of `value`.
pub fn hash_of<T: BorshSerialize>(value: &T) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(&value.try_to_vec().unwrap());
    CryptoHash::new(hasher.finalize().into())
}

/// Derive the [`ValidatorID`] of the validator that owns `public_key`.
pub fn validator_id(public_key: &PublicKeyBytes) -> ValidatorID {
    let mut hasher = CryptoHasher::new();
    hasher.update(public_key.bytes());
    CryptoHash::new(hasher.finalize().into())
}

/// Check that `signature` is a signature over `message` created by the owner of `public_key`.
///
/// Returns `false` if `public_key` is not a valid Ed25519 point.
pub fn verify_signature(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(message, &signature).is_ok()
}

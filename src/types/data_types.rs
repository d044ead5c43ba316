/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{AddAssign, SubAssign},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Height of a block in the block tree. Starts at 0 for the genesis block, and increases by 1 from
/// every block to its children.
///
/// The same number doubles as the consensus height: consensus at height `h` decides the block that
/// will sit at block tree height `h`.
pub type Height = u64;

/// Wall-clock aligned sequence number of a block. Strictly increasing from parent to child, but may
/// skip numbers when no block was produced in a slot.
pub type Slot = u64;

/// One attempt, within a height, to reach agreement on a block.
pub type Round = u64;

/// 32-byte cryptographic hash.
///
/// Within this crate, `CryptoHash`-es are always SHA256 hashes. Block hashes are the SHA256 hash of
/// the Borsh serialization of the block header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zeroes hash. Stands in for "no block": the parent of genesis, and the block hash of a
    /// nil vote.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Check whether this is the all-zeroes hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for CryptoHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "CryptoHash({})", &encoded[0..7])
    }
}

/// Identity of a validator ("worker"). Computed as the SHA256 hash of the validator's public key.
pub type ValidatorID = CryptoHash;

/// Bytes of an Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct PublicKeyBytes([u8; 32]);

impl PublicKeyBytes {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "PublicKeyBytes({})", &encoded[0..7])
    }
}

/// Bytes of an Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// The all-zeroes signature, carried by the genesis block and by messages that are about to be
    /// signed.
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Default for SignatureBytes {
    fn default() -> Self {
        Self::zero()
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "SignatureBytes({})", &encoded[0..7])
    }
}

/// Size of a buffer, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferSize(u64);

impl BufferSize {
    /// Create a new `BufferSize` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `BufferSize`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl AddAssign<u64> for BufferSize {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl SubAssign<u64> for BufferSize {
    fn sub_assign(&mut self, rhs: u64) {
        self.0.sub_assign(rhs)
    }
}

/// Position of a raw block inside the append-only raw block log.
///
/// Raw blocks are kept apart from the small, indexed block row metadata. A locator is enough to read
/// a block's bytes back without consulting any other index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, BorshDeserialize, BorshSerialize)]
pub struct BlockLocator {
    pub file: u32,
    pub offset: u32,
    pub size: u32,
}

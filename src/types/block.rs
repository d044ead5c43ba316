/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{hash_of, verify_signature, Keypair},
    data_types::{CryptoHash, Height, PublicKeyBytes, SignatureBytes, Slot},
    transaction::Transaction,
};

/// The part of a block that its hash commits to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: CryptoHash,
    pub height: Height,
    pub slot: Slot,
    /// SHA256 hash of the Borsh serialization of the block's transactions.
    pub tx_root: CryptoHash,
    /// Root of the [chain state](crate::state::ChainState) that results from applying this block.
    pub state_root: CryptoHash,
    /// Seconds since the Unix Epoch at the time the block was produced.
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> CryptoHash {
        hash_of(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    /// Public key of the producer of the block.
    pub signer: PublicKeyBytes,
    /// Signature of `signer` over the block hash.
    pub signature: SignatureBytes,
}

impl Block {
    /// Create a block with the given header and transactions, signed by `keypair`.
    ///
    /// `header.tx_root` is overwritten with the root of `txs`.
    pub fn new(mut header: BlockHeader, txs: Vec<Transaction>, keypair: &Keypair) -> Block {
        header.tx_root = Block::tx_root(&txs);
        let signature = keypair.sign(&header.hash().bytes());
        Block {
            header,
            txs,
            signer: keypair.public_bytes(),
            signature,
        }
    }

    /// Create an unsigned genesis block at slot 0 whose state root is `state_root`.
    pub fn genesis(state_root: CryptoHash, timestamp: u64) -> Block {
        let txs = Vec::new();
        Block {
            header: BlockHeader {
                version: 0,
                prev_block_hash: CryptoHash::zero(),
                height: 0,
                slot: 0,
                tx_root: Block::tx_root(&txs),
                state_root,
                timestamp,
            },
            txs,
            signer: PublicKeyBytes::default(),
            signature: SignatureBytes::zero(),
        }
    }

    pub fn hash(&self) -> CryptoHash {
        self.header.hash()
    }

    pub fn tx_root(txs: &Vec<Transaction>) -> CryptoHash {
        hash_of(txs)
    }

    /// Checks that `signature` was created by `signer` over the block hash, and that `tx_root`
    /// matches the block's transactions.
    pub fn is_correct(&self) -> bool {
        self.header.tx_root == Block::tx_root(&self.txs)
            && verify_signature(&self.signer, &self.hash().bytes(), &self.signature)
    }
}

/// A batch of blocks that a peer advertises together, e.g., while syncing.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct BlockInv {
    pub blocks: Vec<Block>,
}

impl BlockInv {
    pub fn txs(&self) -> impl Iterator<Item = &Transaction> {
        self.blocks.iter().flat_map(|block| block.txs.iter())
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state derived from applying a block on top of its parent's state.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    crypto_primitives::hash_of,
    data_types::{CryptoHash, Height, Slot},
    workers::WorkerRegistry,
};

/// The state of the chain right after a particular block.
///
/// Its root ([`ChainState::root`]) is committed to in the `state_root` field of the header of the block
/// that produced it, which is why the state does not carry that block's hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainState {
    pub slot: Slot,
    pub height: Height,
    pub workers: WorkerRegistry,
}

impl ChainState {
    /// The state after the genesis block.
    pub fn genesis(workers: WorkerRegistry) -> ChainState {
        ChainState {
            slot: 0,
            height: 0,
            workers,
        }
    }

    pub fn root(&self) -> CryptoHash {
        hash_of(self)
    }

    /// Get the state that a child block at `slot` would produce. Proposers use this to fill in the
    /// `state_root` of the blocks they build.
    pub fn successor(&self, slot: Slot) -> ChainState {
        ChainState {
            slot,
            height: self.height + 1,
            workers: self.workers.clone(),
        }
    }

    /// Apply `block`, a child of the block this state belongs to, and get the resulting state.
    ///
    /// # Errors
    ///
    /// The block is rejected if its slot does not advance past this state's slot, if its height is not
    /// one above this state's height, or if its `state_root` does not commit to the resulting state.
    pub fn process_block(&self, block: &Block) -> Result<ChainState, StateTransitionError> {
        let header = &block.header;
        if header.slot <= self.slot {
            return Err(StateTransitionError::SlotNotIncreasing {
                block: block.hash(),
                parent_slot: self.slot,
                slot: header.slot,
            });
        }
        if header.height != self.height + 1 {
            return Err(StateTransitionError::HeightMismatch {
                block: block.hash(),
                expected: self.height + 1,
                found: header.height,
            });
        }

        let next = self.successor(header.slot);
        let root = next.root();
        if root != header.state_root {
            return Err(StateTransitionError::StateRootMismatch {
                block: block.hash(),
                expected: root,
                found: header.state_root,
            });
        }

        Ok(next)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StateTransitionError {
    SlotNotIncreasing {
        block: CryptoHash,
        parent_slot: Slot,
        slot: Slot,
    },
    HeightMismatch {
        block: CryptoHash,
        expected: Height,
        found: Height,
    },
    StateRootMismatch {
        block: CryptoHash,
        expected: CryptoHash,
        found: CryptoHash,
    },
}

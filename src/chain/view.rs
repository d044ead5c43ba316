/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A movable cursor over the block tree.

use std::sync::Arc;

use crate::{
    block_index::BlockRow,
    types::data_types::{CryptoHash, Slot},
};

/// "The chain as seen from `tip`".
///
/// A `ChainView` resolves historical hashes by slot without touching the [best chain](super::Chain).
/// Its effective tip slot can run ahead of the slot of the tip block, to model slots that have started
/// but have not produced a block yet.
#[derive(Clone, Debug)]
pub struct ChainView {
    tip: Arc<BlockRow>,
    effective_tip_slot: Slot,
}

impl ChainView {
    /// Pin `tip`, with its own slot as the effective tip slot.
    pub fn new(tip: Arc<BlockRow>) -> ChainView {
        let effective_tip_slot = tip.slot;
        ChainView {
            tip,
            effective_tip_slot,
        }
    }

    /// Move the effective tip slot without changing the pinned tip block.
    pub fn set_tip_slot(&mut self, slot: Slot) {
        self.effective_tip_slot = slot;
    }

    pub fn effective_tip_slot(&self) -> Slot {
        self.effective_tip_slot
    }

    /// Get the hash of the block that was the most recent one at `slot`, as seen from the pinned tip.
    ///
    /// Slots between the tip's slot and the effective tip slot resolve to the tip.
    ///
    /// # Errors
    ///
    /// [`ChainViewError::PastTip`] if `slot` is beyond the effective tip slot.
    pub fn get_hash_by_slot(&self, slot: Slot) -> Result<CryptoHash, ChainViewError> {
        match self.tip.get_ancestor_at_slot(slot) {
            Some(row) => Ok(row.hash),
            None if slot <= self.effective_tip_slot => Ok(self.tip.hash),
            None => Err(ChainViewError::PastTip {
                slot,
                effective_tip_slot: self.effective_tip_slot,
            }),
        }
    }

    /// Get the hash of the pinned tip.
    pub fn tip(&self) -> CryptoHash {
        self.tip.hash
    }

    pub fn tip_row(&self) -> &Arc<BlockRow> {
        &self.tip
    }

    pub fn get_last_state_root(&self) -> CryptoHash {
        self.tip.state_root
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChainViewError {
    PastTip { slot: Slot, effective_tip_slot: Slot },
}

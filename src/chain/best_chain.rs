/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Height-indexed view over the selected best chain.

use std::sync::{Arc, RwLock};

use crate::{
    block_index::BlockRow,
    types::data_types::{Height, Slot},
};

/// Number of slots reserved beyond the new tip whenever the backing array has to grow.
const CHAIN_GROWTH_SLACK: usize = 1000;

/// Dense, height-ordered array of the rows on the selected best chain.
///
/// Invariant: `chain[i].height == i` for every valid `i`. The first row is the genesis and the last
/// row is the tip.
///
/// Writers ([`set_tip`](Self::set_tip)) exclude all readers. Readers run concurrently with each other.
pub struct Chain {
    chain: RwLock<Vec<Arc<BlockRow>>>,
}

impl Chain {
    /// Create a chain that contains only `genesis`.
    pub fn new(genesis: Arc<BlockRow>) -> Chain {
        let mut chain = Vec::with_capacity(CHAIN_GROWTH_SLACK);
        chain.push(genesis);
        Chain {
            chain: RwLock::new(chain),
        }
    }

    /// Make `row` the tip of the chain, or empty the chain if `row` is `None`.
    ///
    /// Only the divergent suffix is rewritten: the walk up from `row` stops at the first ancestor that
    /// already occupies its height in the array, so the cost of a reorg is proportional to its depth.
    pub fn set_tip(&self, row: Option<Arc<BlockRow>>) {
        let mut chain = self.chain.write().unwrap();

        let Some(row) = row else {
            chain.clear();
            return;
        };

        let needed = row.height as usize + 1;
        if chain.capacity() < needed {
            let len = chain.len();
            chain.reserve(needed + CHAIN_GROWTH_SLACK - len);
        }

        // Drop stale rows above the new tip, then walk down from the new tip until we reach a row
        // that is already in place.
        chain.truncate(needed);
        let mut current = Some(row);
        while let Some(row) = current {
            let height = row.height as usize;
            if height < chain.len() {
                if Arc::ptr_eq(&chain[height], &row) {
                    break;
                }
                chain[height] = Arc::clone(&row);
            } else {
                // Heights between the old length and the new tip are filled in on the way down,
                // so push placeholders first and overwrite them as the walk reaches them.
                chain.resize(height + 1, Arc::clone(&row));
            }
            current = row.parent().cloned();
        }
    }

    pub fn tip(&self) -> Option<Arc<BlockRow>> {
        self.chain.read().unwrap().last().cloned()
    }

    pub fn genesis(&self) -> Option<Arc<BlockRow>> {
        self.chain.read().unwrap().first().cloned()
    }

    /// Get the height of the tip. An empty chain has height 0.
    pub fn height(&self) -> Height {
        self.chain.read().unwrap().len().saturating_sub(1) as Height
    }

    /// Get the row on the chain at `height`, if the chain is that high.
    pub fn get_node_by_height(&self, height: Height) -> Option<Arc<BlockRow>> {
        self.chain.read().unwrap().get(height as usize).cloned()
    }

    /// Get the row on the chain with the greatest slot lower than or equal to `slot`.
    ///
    /// If `slot` is beyond the tip's slot, the tip is returned.
    pub fn get_node_by_slot(&self, slot: Slot) -> Option<Arc<BlockRow>> {
        let tip = self.tip()?;
        if slot >= tip.slot {
            return Some(tip);
        }
        tip.get_ancestor_at_slot(slot)
    }

    /// Get the successor of `row` on the chain.
    ///
    /// Returns `None` if `row` is the tip, or if `row` is not on the chain at all. The second case is
    /// checked, so the returned row is always a child of `row`.
    pub fn next(&self, row: &BlockRow) -> Option<Arc<BlockRow>> {
        let chain = self.chain.read().unwrap();
        let on_chain = chain.get(row.height as usize)?;
        if on_chain.hash != row.hash {
            return None;
        }
        chain.get(row.height as usize + 1).cloned()
    }

    /// Check whether `row` is on the chain.
    pub fn contains(&self, row: &BlockRow) -> bool {
        self.chain
            .read()
            .unwrap()
            .get(row.height as usize)
            .is_some_and(|on_chain| on_chain.hash == row.hash)
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The node type of the block tree, and its persisted form.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{BlockLocator, CryptoHash, Height, Slot};

/// A node in the block tree: the metadata of one block, without its body.
///
/// ## Links
///
/// A row points up to its parent with an [`Arc`], and down to its children with their hashes, which
/// are keys into the [`BlockIndex`](super::BlockIndex) that owns every row. Upward links are the only
/// strong references between rows, so the tree can never form an ownership cycle.
///
/// ## Mutability
///
/// Once created, a row never changes, except for:
/// 1. Its `locator`, which is set when the block's position in the raw block log becomes known, and
/// 2. Its children, which are only ever appended to.
pub struct BlockRow {
    pub hash: CryptoHash,
    pub height: Height,
    pub slot: Slot,
    pub state_root: CryptoHash,
    parent: Option<Arc<BlockRow>>,
    locator: Mutex<BlockLocator>,
    children: Mutex<Vec<CryptoHash>>,
}

impl BlockRow {
    pub(crate) fn new(
        hash: CryptoHash,
        height: Height,
        slot: Slot,
        state_root: CryptoHash,
        parent: Option<Arc<BlockRow>>,
        locator: BlockLocator,
    ) -> BlockRow {
        BlockRow {
            hash,
            height,
            slot,
            state_root,
            parent,
            locator: Mutex::new(locator),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Get the parent of this row, or `None` if this row is the genesis.
    pub fn parent(&self) -> Option<&Arc<BlockRow>> {
        self.parent.as_ref()
    }

    pub fn locator(&self) -> BlockLocator {
        *self.locator.lock().unwrap()
    }

    pub(crate) fn set_locator(&self, locator: BlockLocator) {
        *self.locator.lock().unwrap() = locator;
    }

    /// Get the hashes of the children of this row, in the order they were indexed.
    pub fn children(&self) -> Vec<CryptoHash> {
        self.children.lock().unwrap().clone()
    }

    /// Append `child` to this row's children, unless it is already there.
    pub(crate) fn add_child(&self, child: CryptoHash) {
        let mut children = self.children.lock().unwrap();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    /// Get the row with the greatest slot that is lower than or equal to `slot`, among this row and its
    /// ancestors.
    ///
    /// Returns `None` if `slot` is greater than this row's slot (nothing is known about that slot on
    /// this branch yet), or if it is lower than the slot of the genesis.
    pub fn get_ancestor_at_slot(self: &Arc<Self>, slot: Slot) -> Option<Arc<BlockRow>> {
        if self.slot < slot {
            return None;
        }

        let mut current = self;
        while slot < current.slot {
            current = current.parent.as_ref()?;
        }
        Some(Arc::clone(current))
    }

    /// Get the ancestor of this row (or this row itself) that sits at `height`.
    ///
    /// Returns `None` if `height` is greater than this row's height.
    pub fn get_ancestor_at_height(self: &Arc<Self>, height: Height) -> Option<Arc<BlockRow>> {
        if self.height < height {
            return None;
        }

        let mut current = self;
        while height < current.height {
            current = current.parent.as_ref()?;
        }
        Some(Arc::clone(current))
    }

    /// Get the persisted form of this row.
    pub fn to_disk(&self) -> BlockRowDisk {
        BlockRowDisk {
            locator: self.locator(),
            state_root: self.state_root,
            height: self.height,
            slot: self.slot,
            hash: self.hash,
            parent: self
                .parent
                .as_ref()
                .map(|parent| parent.hash)
                .unwrap_or(CryptoHash::zero()),
            children: self.children(),
        }
    }
}

impl Debug for BlockRow {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRow")
            .field("hash", &self.hash)
            .field("height", &self.height)
            .field("slot", &self.slot)
            .field("parent", &self.parent.as_ref().map(|parent| parent.hash))
            .finish()
    }
}

/// The persisted form of a [`BlockRow`]. `parent` is the zero hash for the genesis.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockRowDisk {
    pub locator: BlockLocator,
    pub state_root: CryptoHash,
    pub height: Height,
    pub slot: Slot,
    pub hash: CryptoHash,
    pub parent: CryptoHash,
    pub children: Vec<CryptoHash>,
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The arena that owns every [`BlockRow`].

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::types::{
    block::Block,
    data_types::{BlockLocator, CryptoHash},
};

use super::row::{BlockRow, BlockRowDisk};

/// Mapping from block hash to [`BlockRow`].
///
/// Lookups take a shared lock, while inserts take an exclusive lock for their whole
/// read-modify-write. Every row except the genesis has its parent in the index before it is inserted.
pub struct BlockIndex {
    index: RwLock<HashMap<CryptoHash, Arc<BlockRow>>>,
}

impl BlockIndex {
    /// Seed a new index with the single genesis row (height 0, no parent).
    pub fn init_blocks_index(genesis_block: &Block) -> BlockIndex {
        let genesis = Arc::new(BlockRow::new(
            genesis_block.hash(),
            0,
            genesis_block.header.slot,
            genesis_block.header.state_root,
            None,
            BlockLocator::default(),
        ));
        let mut index = HashMap::new();
        index.insert(genesis.hash, genesis);
        BlockIndex {
            index: RwLock::new(index),
        }
    }

    /// Index `block`, whose raw bytes sit at `locator`.
    ///
    /// Adding a block that is already indexed returns the existing row and changes nothing.
    ///
    /// # Errors
    ///
    /// [`BlockIndexError::ParentNotFound`] if the block's parent is not indexed. The index is not
    /// modified in this case.
    pub fn add(
        &self,
        block: &Block,
        locator: BlockLocator,
    ) -> Result<Arc<BlockRow>, BlockIndexError> {
        let hash = block.hash();
        let mut index = self.index.write().unwrap();

        if let Some(row) = index.get(&hash) {
            return Ok(Arc::clone(row));
        }

        let parent_hash = block.header.prev_block_hash;
        let parent = index
            .get(&parent_hash)
            .cloned()
            .ok_or(BlockIndexError::ParentNotFound {
                block: hash,
                parent: parent_hash,
            })?;

        let row = Arc::new(BlockRow::new(
            hash,
            parent.height + 1,
            block.header.slot,
            block.header.state_root,
            Some(Arc::clone(&parent)),
            locator,
        ));
        parent.add_child(hash);
        index.insert(hash, Arc::clone(&row));

        Ok(row)
    }

    pub fn get(&self, hash: &CryptoHash) -> Option<Arc<BlockRow>> {
        self.index.read().unwrap().get(hash).cloned()
    }

    pub fn have(&self, hash: &CryptoHash) -> bool {
        self.index.read().unwrap().contains_key(hash)
    }

    /// Reconstruct a row from its persisted form while replaying the block tree at startup, and connect
    /// it to its parent.
    ///
    /// Unlike [`add`](Self::add), the row's height and locator are taken from `row` rather than
    /// derived. Loading the genesis (slot 0) again only refreshes its locator.
    ///
    /// # Errors
    ///
    /// [`BlockIndexError::MissingParent`] if `row` is not at slot 0 and its parent is not indexed.
    pub fn load_block_node(&self, row: &BlockRowDisk) -> Result<Arc<BlockRow>, BlockIndexError> {
        let mut index = self.index.write().unwrap();

        if let Some(existing) = index.get(&row.hash) {
            existing.set_locator(row.locator);
            return Ok(Arc::clone(existing));
        }

        let parent = match index.get(&row.parent).cloned() {
            Some(parent) => Some(parent),
            None if row.slot == 0 => None,
            None => {
                return Err(BlockIndexError::MissingParent {
                    block: row.hash,
                    parent: row.parent,
                })
            }
        };

        let loaded = Arc::new(BlockRow::new(
            row.hash,
            row.height,
            row.slot,
            row.state_root,
            parent.clone(),
            row.locator,
        ));
        if let Some(parent) = parent {
            parent.add_child(row.hash);
        }
        index.insert(row.hash, Arc::clone(&loaded));

        Ok(loaded)
    }

    /// Record the position of the block `hash` in the raw block log.
    ///
    /// # Errors
    ///
    /// [`BlockIndexError::NotFound`] if `hash` is not indexed.
    pub fn set_disk_location(
        &self,
        hash: &CryptoHash,
        locator: BlockLocator,
    ) -> Result<(), BlockIndexError> {
        let index = self.index.read().unwrap();
        let row = index
            .get(hash)
            .ok_or(BlockIndexError::NotFound { block: *hash })?;
        row.set_locator(locator);
        Ok(())
    }

    /// Get the number of rows in the index.
    pub fn len(&self) -> usize {
        self.index.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().unwrap().is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BlockIndexError {
    ParentNotFound {
        block: CryptoHash,
        parent: CryptoHash,
    },
    MissingParent {
        block: CryptoHash,
        parent: CryptoHash,
    },
    NotFound {
        block: CryptoHash,
    },
}

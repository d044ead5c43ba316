/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single authority over the block tree, the best chain, and the chain's checkpoints.
//!
//! ## Locking
//!
//! Every mutation of the [`BlockIndex`], the [`Chain`], or the [`BlockStore`] happens while holding
//! the lock around the block store. This keeps inserts into the index and writes to the store from
//! racing [`Chain::set_tip`]. Readers do not take it: the index and the chain have their own
//! read/write locks and can be read concurrently with each other.
//!
//! The lock around the block store is always acquired before any of the other locks in this module.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{
    block_index::{BlockIndex, BlockIndexError, BlockRow, BlockRowDisk},
    chain::{Chain, ChainView},
    store::{BlockStore, BlockStoreError, BlockStoreWriteBatch, KVGetError, KVSetError, KVStore, Key},
    types::{
        block::Block,
        data_types::{CryptoHash, Height, Slot},
    },
};

use super::chain_state::{ChainState, StateTransitionError};

/// Number of slots behind the finalized slot for which derived states are still kept in memory.
const STATE_RETENTION_SLOTS: Slot = 20;

pub struct StateService<K: KVStore> {
    store: Mutex<BlockStore<K>>,
    index: BlockIndex,
    chain: Chain,
    heads: Mutex<Heads>,
    state_map: Mutex<HashMap<CryptoHash, ChainState>>,
    sync: AtomicBool,
}

#[derive(Clone)]
struct Checkpoint {
    row: Arc<BlockRow>,
    state: ChainState,
}

struct Heads {
    justified: Checkpoint,
    finalized: Checkpoint,
}

impl<K: KVStore> StateService<K> {
    /// Open the chain stored in `kv_store`.
    ///
    /// If the store has never been initialized, it is bootstrapped with `genesis_block` as the tip and
    /// both checkpoints. Otherwise the block tree, the checkpoints, and the derived states are reloaded
    /// from it.
    pub fn new(
        kv_store: K,
        genesis_block: &Block,
        genesis_state: ChainState,
    ) -> Result<StateService<K>, StateServiceError> {
        let genesis_hash = genesis_block.hash();
        let index = BlockIndex::init_blocks_index(genesis_block);
        let genesis_row = index
            .get(&genesis_hash)
            .ok_or(StateServiceError::BlockNotFound {
                block: genesis_hash,
            })?;
        let chain = Chain::new(Arc::clone(&genesis_row));
        let store = BlockStore::new(kv_store);
        let fresh = store.get_justified_head()?.is_none();

        let genesis_checkpoint = Checkpoint {
            row: genesis_row,
            state: genesis_state.clone(),
        };
        let service = StateService {
            store: Mutex::new(store),
            index,
            chain,
            heads: Mutex::new(Heads {
                justified: genesis_checkpoint.clone(),
                finalized: genesis_checkpoint,
            }),
            state_map: Mutex::new(HashMap::from([(genesis_hash, genesis_state.clone())])),
            sync: AtomicBool::new(false),
        };

        if fresh {
            service.initialize_database(genesis_block, genesis_state)?;
        } else {
            service.load_blockchain_from_disk(&genesis_hash)?;
        }

        Ok(service)
    }

    /// Bootstrap a brand-new chain: append the genesis block to the raw block log, and persist its row,
    /// both checkpoints (which are the genesis), their states, and the tip in one atomic write.
    pub fn initialize_database(
        &self,
        genesis_block: &Block,
        genesis_state: ChainState,
    ) -> Result<(), StateServiceError> {
        let mut store = self.store.lock().unwrap();
        let genesis_hash = genesis_block.hash();
        log::info!("Initializing a new chain with genesis {}", genesis_hash);

        let locator = store.add_raw_block(genesis_block)?;
        self.index.set_disk_location(&genesis_hash, locator)?;
        let row = self
            .index
            .get(&genesis_hash)
            .ok_or(StateServiceError::BlockNotFound {
                block: genesis_hash,
            })?;
        self.chain.set_tip(Some(Arc::clone(&row)));
        self.set_block_state(genesis_hash, genesis_state.clone());

        let mut wb = BlockStoreWriteBatch::new();
        wb.set_block_row(&row.to_disk())?;
        wb.set_justified_head(&genesis_hash)?;
        wb.set_finalized_head(&genesis_hash)?;
        wb.set_justified_state(&genesis_state)?;
        wb.set_finalized_state(&genesis_state)?;
        wb.set_tip(&genesis_hash)?;
        store.write(wb);

        let checkpoint = Checkpoint {
            row,
            state: genesis_state,
        };
        let mut heads = self.heads.lock().unwrap();
        heads.justified = checkpoint.clone();
        heads.finalized = checkpoint;

        Ok(())
    }

    /// Reload the block tree, the checkpoints, and the derived states of every block after the
    /// justified head from the store.
    ///
    /// Any error aborts the reload: a partially loaded chain is never returned.
    pub fn load_blockchain_from_disk(&self, genesis_hash: &CryptoHash) -> Result<(), StateServiceError> {
        let store = self.store.lock().unwrap();

        log::info!("Loading block index");
        let justified_row = self.load_block_index(&store, genesis_hash)?;

        log::info!("Loading justified and finalized states");
        self.load_justified_and_finalized_states(&store)?;

        log::info!("Loading states after the justified head");
        self.load_state_map(&store, &justified_row)?;

        let tip = store
            .get_tip()?
            .and_then(|tip| self.index.get(&tip))
            .unwrap_or_else(|| Arc::clone(&self.heads.lock().unwrap().justified.row));
        log::info!("Loaded chain with tip {} at height {}", tip.hash, tip.height);
        self.chain.set_tip(Some(tip));

        Ok(())
    }

    /// Replay the persisted rows breadth-first from the genesis, without expanding rows at or above
    /// the height of the justified head. Returns the persisted row of the justified head.
    fn load_block_index(
        &self,
        store: &BlockStore<K>,
        genesis_hash: &CryptoHash,
    ) -> Result<BlockRowDisk, StateServiceError> {
        let justified_hash = store
            .get_justified_head()?
            .ok_or(KVGetError::ValueExpectedButNotFound {
                key: Key::JustifiedHead,
            })?;
        let justified_row = get_block_row(store, &justified_hash)?;

        let genesis_row = get_block_row(store, genesis_hash)?;
        self.index.load_block_node(&genesis_row)?;

        let mut queue = VecDeque::from([genesis_row]);
        while let Some(row) = queue.pop_front() {
            if row.height >= justified_row.height {
                continue;
            }
            for child in &row.children {
                let child_row = get_block_row(store, child)?;
                self.index.load_block_node(&child_row)?;
                queue.push_back(child_row);
            }
        }

        if !self.index.have(&justified_hash) {
            return Err(StateServiceError::BlockNotFound {
                block: justified_hash,
            });
        }

        Ok(justified_row)
    }

    fn load_justified_and_finalized_states(&self, store: &BlockStore<K>) -> Result<(), StateServiceError> {
        let justified_hash = store
            .get_justified_head()?
            .ok_or(KVGetError::ValueExpectedButNotFound {
                key: Key::JustifiedHead,
            })?;
        let finalized_hash = store
            .get_finalized_head()?
            .ok_or(KVGetError::ValueExpectedButNotFound {
                key: Key::FinalizedHead,
            })?;
        let justified_state = store
            .get_justified_state()?
            .ok_or(KVGetError::ValueExpectedButNotFound {
                key: Key::JustifiedState,
            })?;
        let finalized_state = store
            .get_finalized_state()?
            .ok_or(KVGetError::ValueExpectedButNotFound {
                key: Key::FinalizedState,
            })?;

        let justified_row = self.get_indexed_row(&justified_hash)?;
        let finalized_row = self.get_indexed_row(&finalized_hash)?;

        self.set_block_state(justified_hash, justified_state.clone());
        self.set_block_state(finalized_hash, finalized_state.clone());

        let mut heads = self.heads.lock().unwrap();
        heads.justified = Checkpoint {
            row: justified_row,
            state: justified_state,
        };
        heads.finalized = Checkpoint {
            row: finalized_row,
            state: finalized_state,
        };

        Ok(())
    }

    /// Replay every block after the justified head, breadth-first, re-deriving its state from its raw
    /// block and loading its row into the index.
    fn load_state_map(
        &self,
        store: &BlockStore<K>,
        justified_row: &BlockRowDisk,
    ) -> Result<(), StateServiceError> {
        let mut queue = VecDeque::from([justified_row.clone()]);
        let mut replayed = 0;
        while let Some(row) = queue.pop_front() {
            let parent_state = self.get_state_for_hash(&row.hash).ok_or(
                StateServiceError::ParentStateNotFound {
                    block: row.hash,
                    parent: row.parent,
                },
            )?;
            for child in &row.children {
                let child_row = get_block_row(store, child)?;
                let block = store.get_raw_block(&child_row.locator)?;
                let state = parent_state.process_block(&block)?;
                self.index.load_block_node(&child_row)?;
                self.set_block_state(child_row.hash, state);
                queue.push_back(child_row);
                replayed += 1;
            }
        }
        log::debug!("Replayed {} blocks after the justified head", replayed);

        Ok(())
    }

    /// Derive the state of `block`, append it to the raw block log, and index and persist its row
    /// together with its parent's updated children.
    ///
    /// Adding a block that is already indexed returns its existing row and state.
    pub fn add(&self, block: &Block) -> Result<(Arc<BlockRow>, ChainState), StateServiceError> {
        let mut store = self.store.lock().unwrap();
        let hash = block.hash();

        if let Some(row) = self.index.get(&hash) {
            let state = self
                .get_state_for_hash(&hash)
                .ok_or(StateServiceError::StateNotFound { block: hash })?;
            return Ok((row, state));
        }

        let parent_hash = block.header.prev_block_hash;
        if !self.index.have(&parent_hash) {
            return Err(BlockIndexError::ParentNotFound {
                block: hash,
                parent: parent_hash,
            }
            .into());
        }
        let parent_state =
            self.get_state_for_hash(&parent_hash)
                .ok_or(StateServiceError::ParentStateNotFound {
                    block: hash,
                    parent: parent_hash,
                })?;
        let state = parent_state.process_block(block)?;

        let locator = store.add_raw_block(block)?;
        let row = self.index.add(block, locator)?;
        self.set_block_state(hash, state.clone());

        let mut wb = BlockStoreWriteBatch::new();
        wb.set_block_row(&row.to_disk())?;
        if let Some(parent) = row.parent() {
            wb.set_block_row(&parent.to_disk())?;
        }
        store.write(wb);

        Ok((row, state))
    }

    /// Record `state` as the state derived from the block `hash`.
    pub fn set_block_state(&self, hash: CryptoHash, state: ChainState) {
        self.state_map.lock().unwrap().insert(hash, state);
    }

    pub fn get_state_for_hash(&self, hash: &CryptoHash) -> Option<ChainState> {
        self.state_map.lock().unwrap().get(hash).cloned()
    }

    /// Drop the derived states of blocks more than a few slots older than `slot`.
    ///
    /// Nothing is dropped while `slot` is within the first few slots of the chain.
    pub fn remove_before_slot(&self, slot: Slot) {
        if slot < STATE_RETENTION_SLOTS {
            return;
        }
        let cutoff = slot - STATE_RETENTION_SLOTS;
        let heads = self.heads.lock().unwrap();
        let keep = [heads.justified.row.hash, heads.finalized.row.hash];
        drop(heads);

        let mut state_map = self.state_map.lock().unwrap();
        let before = state_map.len();
        state_map.retain(|hash, _| {
            keep.contains(hash)
                || self
                    .index
                    .get(hash)
                    .map_or(true, |row| row.slot >= cutoff)
        });
        log::debug!(
            "Removed {} states, {} states remain",
            before - state_map.len(),
            state_map.len()
        );
    }

    /// Get a [`ChainView`] pinned to the block `tip`.
    pub fn get_sub_view(&self, tip: &CryptoHash) -> Result<ChainView, StateServiceError> {
        self.index
            .get(tip)
            .map(ChainView::new)
            .ok_or(StateServiceError::TipNotFound { tip: *tip })
    }

    /// Get the tip of the best chain.
    pub fn tip(&self) -> Arc<BlockRow> {
        match self.chain.tip() {
            Some(tip) => tip,
            None => Arc::clone(&self.heads.lock().unwrap().justified.row),
        }
    }

    /// Get the state derived from the tip of the best chain.
    pub fn tip_state(&self) -> Option<ChainState> {
        self.get_state_for_hash(&self.tip().hash)
    }

    pub fn height(&self) -> Height {
        self.chain.height()
    }

    /// Make `row` the tip of the best chain, and persist it.
    pub fn set_tip(&self, row: Arc<BlockRow>) -> Result<(), StateServiceError> {
        let mut store = self.store.lock().unwrap();
        let mut wb = BlockStoreWriteBatch::new();
        wb.set_tip(&row.hash)?;
        self.chain.set_tip(Some(row));
        store.write(wb);
        Ok(())
    }

    pub fn is_sync(&self) -> bool {
        self.sync.load(Ordering::SeqCst)
    }

    pub fn set_sync_status(&self, sync: bool) {
        self.sync.store(sync, Ordering::SeqCst)
    }

    /// Get the justified head and its state.
    pub fn get_justified_head(&self) -> (Arc<BlockRow>, ChainState) {
        let heads = self.heads.lock().unwrap();
        (Arc::clone(&heads.justified.row), heads.justified.state.clone())
    }

    /// Get the finalized head and its state.
    pub fn get_finalized_head(&self) -> (Arc<BlockRow>, ChainState) {
        let heads = self.heads.lock().unwrap();
        (Arc::clone(&heads.finalized.row), heads.finalized.state.clone())
    }

    /// Make the block `hash` the justified head, and persist it together with `state`.
    ///
    /// # Errors
    ///
    /// [`StateServiceError::BlockNotFound`] if `hash` is not indexed.
    pub fn set_justified_head(&self, hash: &CryptoHash, state: ChainState) -> Result<(), StateServiceError> {
        let mut store = self.store.lock().unwrap();
        let row = self.get_indexed_row(hash)?;

        let mut wb = BlockStoreWriteBatch::new();
        wb.set_justified_head(hash)?;
        wb.set_justified_state(&state)?;
        store.write(wb);

        self.heads.lock().unwrap().justified = Checkpoint { row, state };
        Ok(())
    }

    /// Make the block `hash` the finalized head, and persist it together with `state`.
    ///
    /// # Errors
    ///
    /// [`StateServiceError::BlockNotFound`] if `hash` is not indexed.
    pub fn set_finalized_head(&self, hash: &CryptoHash, state: ChainState) -> Result<(), StateServiceError> {
        let mut store = self.store.lock().unwrap();
        let row = self.get_indexed_row(hash)?;

        let mut wb = BlockStoreWriteBatch::new();
        wb.set_finalized_head(hash)?;
        wb.set_finalized_state(&state)?;
        store.write(wb);

        self.heads.lock().unwrap().finalized = Checkpoint { row, state };
        Ok(())
    }

    /// Move both checkpoints at once: `justified` becomes the justified head and `finalized` the
    /// finalized head. Both are persisted in a single write batch.
    ///
    /// # Errors
    ///
    /// [`StateServiceError::BlockNotFound`] if either hash is not indexed. Nothing is written then.
    pub fn set_checkpoints(
        &self,
        (finalized, finalized_state): (&CryptoHash, ChainState),
        (justified, justified_state): (&CryptoHash, ChainState),
    ) -> Result<(), StateServiceError> {
        let mut store = self.store.lock().unwrap();
        let finalized_row = self.get_indexed_row(finalized)?;
        let justified_row = self.get_indexed_row(justified)?;

        let mut wb = BlockStoreWriteBatch::new();
        wb.set_finalized_head(finalized)?;
        wb.set_finalized_state(&finalized_state)?;
        wb.set_justified_head(justified)?;
        wb.set_justified_state(&justified_state)?;
        store.write(wb);

        let mut heads = self.heads.lock().unwrap();
        heads.finalized = Checkpoint {
            row: finalized_row,
            state: finalized_state,
        };
        heads.justified = Checkpoint {
            row: justified_row,
            state: justified_state,
        };
        Ok(())
    }

    pub fn get_row_by_hash(&self, hash: &CryptoHash) -> Option<Arc<BlockRow>> {
        self.index.get(hash)
    }

    /// Read the block `hash` back from the raw block log.
    pub fn get_raw_block(&self, hash: &CryptoHash) -> Result<Block, StateServiceError> {
        let row = self.get_indexed_row(hash)?;
        let store = self.store();
        Ok(store.get_raw_block(&row.locator())?)
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Get the block store. Holding the returned guard blocks every mutation of the service.
    pub fn store(&self) -> MutexGuard<'_, BlockStore<K>> {
        self.store.lock().unwrap()
    }

    fn get_indexed_row(&self, hash: &CryptoHash) -> Result<Arc<BlockRow>, StateServiceError> {
        self.index
            .get(hash)
            .ok_or(StateServiceError::BlockNotFound { block: *hash })
    }
}

fn get_block_row<K: KVStore>(
    store: &BlockStore<K>,
    hash: &CryptoHash,
) -> Result<BlockRowDisk, StateServiceError> {
    Ok(store
        .get_block_row(hash)?
        .ok_or(KVGetError::ValueExpectedButNotFound {
            key: Key::BlockRow { block: *hash },
        })?)
}

#[derive(Debug)]
pub enum StateServiceError {
    BlockStoreError(BlockStoreError),
    BlockIndexError(BlockIndexError),
    StateTransitionError(StateTransitionError),
    TipNotFound { tip: CryptoHash },
    BlockNotFound { block: CryptoHash },
    StateNotFound { block: CryptoHash },
    ParentStateNotFound { block: CryptoHash, parent: CryptoHash },
}

impl From<BlockStoreError> for StateServiceError {
    fn from(value: BlockStoreError) -> Self {
        StateServiceError::BlockStoreError(value)
    }
}

impl From<KVGetError> for StateServiceError {
    fn from(value: KVGetError) -> Self {
        StateServiceError::BlockStoreError(BlockStoreError::KVGetError(value))
    }
}

impl From<KVSetError> for StateServiceError {
    fn from(value: KVSetError) -> Self {
        StateServiceError::BlockStoreError(BlockStoreError::KVSetError(value))
    }
}

impl From<BlockIndexError> for StateServiceError {
    fn from(value: BlockIndexError) -> Self {
        StateServiceError::BlockIndexError(value)
    }
}

impl From<StateTransitionError> for StateServiceError {
    fn from(value: StateTransitionError) -> Self {
        StateServiceError::StateTransitionError(value)
    }
}

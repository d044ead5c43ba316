/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed access to the chain variables persisted in a [`KVStore`].

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    block_index::BlockRowDisk,
    state::ChainState,
    types::{
        block::Block,
        data_types::{BlockLocator, CryptoHash},
    },
};

use super::{
    pluggables::{KVGetError, KVSetError, KVStore, Key, WriteBatch},
    variables::{self, concat},
};

/// Reads and writes the chain's [variables](super::variables) in a [`KVStore`].
///
/// Reads go straight to the store. Writes, except for appends to the raw block log, are staged in a
/// [`BlockStoreWriteBatch`] and applied atomically with [`write`](Self::write).
#[derive(Clone)]
pub struct BlockStore<K: KVStore> {
    kv_store: K,
}

impl<K: KVStore> BlockStore<K> {
    pub fn new(kv_store: K) -> Self {
        Self { kv_store }
    }

    /// Atomically apply every change staged in `wb`.
    pub fn write(&mut self, wb: BlockStoreWriteBatch<K::WriteBatch>) {
        self.kv_store.write(wb.0)
    }

    /* ↓↓↓ Block Rows ↓↓↓ */

    pub fn get_block_row(&self, block: &CryptoHash) -> Result<Option<BlockRowDisk>, KVGetError> {
        self.get_value(
            &concat(&variables::BLOCK_ROWS, &block.bytes()),
            || Key::BlockRow { block: *block },
        )
    }

    /* ↓↓↓ Raw Blocks ↓↓↓ */

    /// Read the block stored at `locator` in the raw block log.
    ///
    /// # Errors
    ///
    /// [`BlockStoreError::RawBlockSizeMismatch`] if the bytes stored at `locator.file` and
    /// `locator.offset` are not exactly `locator.size` bytes long.
    pub fn get_raw_block(&self, locator: &BlockLocator) -> Result<Block, BlockStoreError> {
        let bytes = self
            .kv_store
            .get(&raw_block_key(locator))
            .ok_or(KVGetError::ValueExpectedButNotFound {
                key: Key::RawBlock { locator: *locator },
            })?;

        if bytes.len() as u64 != locator.size as u64 {
            return Err(BlockStoreError::RawBlockSizeMismatch {
                locator: *locator,
                found: bytes.len() as u64,
            });
        }

        Ok(Block::deserialize(&mut bytes.as_slice()).map_err(|err| {
            KVGetError::DeserializeValueError {
                key: Key::RawBlock { locator: *locator },
                source: err,
            }
        })?)
    }

    /// Append `block` to the raw block log, and return the locator it can be read back from.
    ///
    /// The append and the cursor update are written immediately and atomically.
    pub fn add_raw_block(&mut self, block: &Block) -> Result<BlockLocator, BlockStoreError> {
        let bytes = block
            .try_to_vec()
            .map_err(|err| KVSetError::SerializeValueError {
                key: Key::RawBlock {
                    locator: BlockLocator::default(),
                },
                source: err,
            })?;
        let size = bytes.len() as u32;

        let cursor: BlockLocator = self
            .get_value(&variables::RAW_LOG_CURSOR, || Key::RawLogCursor)?
            .unwrap_or_default();
        let locator = if cursor.offset as u64 + size as u64 > variables::RAW_LOG_FILE_CAPACITY as u64
            && cursor.offset != 0
        {
            BlockLocator {
                file: cursor.file + 1,
                offset: 0,
                size,
            }
        } else {
            BlockLocator {
                file: cursor.file,
                offset: cursor.offset,
                size,
            }
        };
        let next_cursor = BlockLocator {
            file: locator.file,
            offset: locator.offset.saturating_add(size),
            size: 0,
        };

        let mut wb = BlockStoreWriteBatch::<K::WriteBatch>::new();
        wb.0.set(&raw_block_key(&locator), &bytes);
        wb.set_value(&variables::RAW_LOG_CURSOR, &next_cursor, || Key::RawLogCursor)?;
        self.write(wb);

        Ok(locator)
    }

    /* ↓↓↓ Checkpoints ↓↓↓ */

    pub fn get_justified_head(&self) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_value(&variables::JUSTIFIED_HEAD, || Key::JustifiedHead)
    }

    pub fn get_finalized_head(&self) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_value(&variables::FINALIZED_HEAD, || Key::FinalizedHead)
    }

    pub fn get_justified_state(&self) -> Result<Option<ChainState>, KVGetError> {
        self.get_value(&variables::JUSTIFIED_STATE, || Key::JustifiedState)
    }

    pub fn get_finalized_state(&self) -> Result<Option<ChainState>, KVGetError> {
        self.get_value(&variables::FINALIZED_STATE, || Key::FinalizedState)
    }

    /* ↓↓↓ Tip ↓↓↓ */

    pub fn get_tip(&self) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_value(&variables::TIP, || Key::Tip)
    }

    /* ↓↓↓ Genesis Time ↓↓↓ */

    pub fn get_genesis_time(&self) -> Result<Option<u64>, KVGetError> {
        self.get_value(&variables::GENESIS_TIME, || Key::GenesisTime)
    }

    fn get_value<T: BorshDeserialize>(
        &self,
        key_bytes: &[u8],
        key: impl FnOnce() -> Key,
    ) -> Result<Option<T>, KVGetError> {
        match self.kv_store.get(key_bytes) {
            None => Ok(None),
            Some(bytes) => Ok(Some(T::deserialize(&mut bytes.as_slice()).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: key(),
                    source: err,
                },
            )?)),
        }
    }
}

/// A set of changes to the chain's variables that is applied atomically by
/// [`BlockStore::write`].
pub struct BlockStoreWriteBatch<W: WriteBatch>(W);

impl<W: WriteBatch> BlockStoreWriteBatch<W> {
    pub fn new() -> Self {
        Self(W::new())
    }

    pub fn set_block_row(&mut self, row: &BlockRowDisk) -> Result<(), KVSetError> {
        self.set_value(
            &concat(&variables::BLOCK_ROWS, &row.hash.bytes()),
            row,
            || Key::BlockRow { block: row.hash },
        )
    }

    pub fn set_justified_head(&mut self, block: &CryptoHash) -> Result<(), KVSetError> {
        self.set_value(&variables::JUSTIFIED_HEAD, block, || Key::JustifiedHead)
    }

    pub fn set_finalized_head(&mut self, block: &CryptoHash) -> Result<(), KVSetError> {
        self.set_value(&variables::FINALIZED_HEAD, block, || Key::FinalizedHead)
    }

    pub fn set_justified_state(&mut self, state: &ChainState) -> Result<(), KVSetError> {
        self.set_value(&variables::JUSTIFIED_STATE, state, || Key::JustifiedState)
    }

    pub fn set_finalized_state(&mut self, state: &ChainState) -> Result<(), KVSetError> {
        self.set_value(&variables::FINALIZED_STATE, state, || Key::FinalizedState)
    }

    pub fn set_tip(&mut self, block: &CryptoHash) -> Result<(), KVSetError> {
        self.set_value(&variables::TIP, block, || Key::Tip)
    }

    pub fn set_genesis_time(&mut self, genesis_time: u64) -> Result<(), KVSetError> {
        self.set_value(&variables::GENESIS_TIME, &genesis_time, || Key::GenesisTime)
    }

    fn set_value<T: BorshSerialize>(
        &mut self,
        key_bytes: &[u8],
        value: &T,
        key: impl FnOnce() -> Key,
    ) -> Result<(), KVSetError> {
        let bytes = value
            .try_to_vec()
            .map_err(|err| KVSetError::SerializeValueError {
                key: key(),
                source: err,
            })?;
        self.0.set(key_bytes, &bytes);
        Ok(())
    }
}

impl<W: WriteBatch> Default for BlockStoreWriteBatch<W> {
    fn default() -> Self {
        Self::new()
    }
}

fn raw_block_key(locator: &BlockLocator) -> Vec<u8> {
    concat(
        &variables::RAW_BLOCKS,
        &concat(&locator.file.to_le_bytes(), &locator.offset.to_le_bytes()),
    )
}

#[derive(Debug)]
pub enum BlockStoreError {
    KVGetError(KVGetError),
    KVSetError(KVSetError),
    RawBlockSizeMismatch { locator: BlockLocator, found: u64 },
}

impl From<KVGetError> for BlockStoreError {
    fn from(value: KVGetError) -> Self {
        BlockStoreError::KVGetError(value)
    }
}

impl From<KVSetError> for BlockStoreError {
    fn from(value: KVSetError) -> Self {
        BlockStoreError::KVSetError(value)
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable chain persistence.
//!
//! The chain core does not care how bytes reach the disk. Library users provide a key-value store
//! that implements [`KVStore`], and the [`BlockStore`](super::BlockStore) lays the chain's variables out
//! on top of it as described in [`variables`](super::variables).

use std::fmt::Display;

use crate::types::data_types::{BlockLocator, CryptoHash};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply every insertion and deletion in `wb`.
    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

/// Error when trying to serialize a value before writing it into the [key value store][KVStore].
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

#[derive(Debug)]
pub enum Key {
    BlockRow { block: CryptoHash },
    RawBlock { locator: BlockLocator },
    RawLogCursor,
    JustifiedHead,
    FinalizedHead,
    JustifiedState,
    FinalizedState,
    Tip,
    GenesisTime,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::BlockRow { block } => write!(f, "Block Row for block {}", block),
            Key::RawBlock { locator } => write!(
                f,
                "Raw Block at file {}, offset {}, size {}",
                locator.file, locator.offset, locator.size
            ),
            Key::RawLogCursor => write!(f, "Raw Log Cursor"),
            Key::JustifiedHead => write!(f, "Justified Head"),
            Key::FinalizedHead => write!(f, "Finalized Head"),
            Key::JustifiedState => write!(f, "Justified State"),
            Key::FinalizedState => write!(f, "Finalized State"),
            Key::Tip => write!(f, "Tip"),
            Key::GenesisTime => write!(f, "Genesis Time"),
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable storage of the block tree, the raw block log, and the chain's checkpoints, on top of a
//! user-provided key-value store.

pub mod block_store;

pub mod pluggables;

pub mod variables;

pub use block_store::{BlockStore, BlockStoreError, BlockStoreWriteBatch};

pub use pluggables::{KVGet, KVGetError, KVSetError, KVStore, Key, WriteBatch};

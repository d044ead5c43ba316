/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each persisted chain variable is stored in the user-provided
//! key-value store.
//!
//! # List of variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Block Rows|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`BlockRowDisk`](crate::block_index::BlockRowDisk)|The metadata of every indexed block, including the hashes of its children.|
//! |Raw Blocks|[`BlockLocator`](crate::types::data_types::BlockLocator) -> [`Block`](crate::types::block::Block)|The append-only raw block log. Separate from the block rows so that the rows stay small.|
//! |Raw Log Cursor|[`BlockLocator`](crate::types::data_types::BlockLocator)|The position at which the next raw block will be appended. Its `size` is unused.|
//! |Justified Head|[`CryptoHash`](crate::types::data_types::CryptoHash)|The hash of the most recently decided block.|
//! |Finalized Head|[`CryptoHash`](crate::types::data_types::CryptoHash)|The hash of the decided block before the justified head.|
//! |Justified State|[`ChainState`](crate::state::ChainState)|The state after the justified head.|
//! |Finalized State|[`ChainState`](crate::state::ChainState)|The state after the finalized head.|
//! |Tip|[`CryptoHash`](crate::types::data_types::CryptoHash)|The hash of the tip of the best chain.|
//! |Genesis Time|`u64`|Seconds since the Unix Epoch at which slot 0 started.|
//!
//! # Persistence of variables
//!
//! Every variable is stored as a **Borsh-serialized value**.
//!
//! "Single values" (e.g., the tip) are stored in one-byte, constant keys defined in constants sharing
//! the variable's name.
//!
//! Mappings of the form "`A` -> `B`" (e.g., block rows) are stored in multiple keys, each key being
//! the concatenation of a specific constant one-byte prefix sharing the variable's name, and then the
//! serialization of an instance of the `A` type. Raw blocks are keyed by the `file` and `offset` of
//! their locator only, each as a little-endian `u32`.

pub const BLOCK_ROWS: [u8; 1] = [0];
pub const RAW_BLOCKS: [u8; 1] = [1];
pub const RAW_LOG_CURSOR: [u8; 1] = [2];
pub const JUSTIFIED_HEAD: [u8; 1] = [3];
pub const FINALIZED_HEAD: [u8; 1] = [4];
pub const JUSTIFIED_STATE: [u8; 1] = [5];
pub const FINALIZED_STATE: [u8; 1] = [6];
pub const TIP: [u8; 1] = [7];
pub const GENESIS_TIME: [u8; 1] = [8];

/// Maximum number of bytes in one file of the raw block log. A block that does not fit in the
/// current file starts the next one.
pub const RAW_LOG_FILE_CAPACITY: u32 = 64 * 1024 * 1024;

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

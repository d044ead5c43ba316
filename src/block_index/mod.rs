/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory tree of block headers.
//!
//! Every block that has been validated and connected to the tree gets a [`BlockRow`], which is owned
//! by the [`BlockIndex`] and looked up by hash. Rows are never removed.

pub mod index;

pub mod row;

pub use index::{BlockIndex, BlockIndexError};

pub use row::{BlockRow, BlockRowDisk};

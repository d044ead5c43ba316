/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Linear views over the block tree: the selected best [`Chain`], and [`ChainView`] cursors pinned to
//! arbitrary tips.

pub mod best_chain;

pub mod view;

pub use best_chain::Chain;

pub use view::{ChainView, ChainViewError};

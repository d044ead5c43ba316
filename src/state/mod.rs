/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-block derived state, and the [`StateService`] that owns the block tree, the best chain, and
//! the justified and finalized checkpoints.

pub mod chain_state;

pub mod service;

pub use chain_state::{ChainState, StateTransitionError};

pub use service::{StateService, StateServiceError};

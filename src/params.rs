/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Parameters that every node of a network must agree on.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{
    state::ChainState,
    types::{
        block::Block,
        data_types::{Height, PublicKeyBytes, Slot},
        workers::WorkerRegistry,
    },
};

#[derive(Clone, Debug, TypedBuilder)]
pub struct ChainParams {
    /// Seconds since the Unix Epoch at which slot 0 starts. Only used the first time a node opens its
    /// store; after that, the genesis time persisted in the store is used.
    #[builder(default = 0)]
    pub genesis_time: u64,

    /// Wall-clock length of a slot.
    #[builder(default = Duration::from_secs(5))]
    pub slot_duration: Duration,

    /// Blocks below this height are produced by the single pre-workers key rather than by registered
    /// workers.
    #[builder(default = 0)]
    pub last_pre_workers_block: Height,

    #[builder(default)]
    pub pre_workers_public_key: PublicKeyBytes,

    /// The workers registered in the genesis state.
    pub initial_workers: WorkerRegistry,
}

impl ChainParams {
    pub fn genesis_state(&self) -> ChainState {
        ChainState::genesis(self.initial_workers.clone())
    }

    pub fn genesis_block(&self) -> Block {
        Block::genesis(self.genesis_state().root(), self.genesis_time)
    }

    /// Get the slot that the wall clock is in at `now` (seconds since the Unix Epoch), for a network
    /// that started at `genesis_time`.
    pub fn slot_at(&self, genesis_time: u64, now: u64) -> Slot {
        let slot_millis = self.slot_duration.as_millis().max(1);
        let elapsed_millis = now.saturating_sub(genesis_time) as u128 * 1000;
        (elapsed_millis / slot_millis) as Slot
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The core of a proof-of-stake blockchain node: a block tree indexed by hash with its persisted
//! block store, the best chain picked by fork choice over that tree, a round-based BFT consensus
//! engine that decides one block per height, and the [`Blockchain`](blockchain::Blockchain) facade
//! that ties them together.
//!
//! Most users only need [`node::NodeSpec`] to start a [`node::Node`], and the pluggable traits:
//! [`networking::Network`], [`store::KVStore`], and [`blockchain::TxVerifier`].

pub mod block_index;

pub mod blockchain;

pub mod chain;

pub mod consensus;

pub mod events;

pub mod logging;

pub mod networking;

pub mod node;

pub mod params;

pub mod state;

pub mod store;

pub mod types;

pub(crate) mod event_bus;

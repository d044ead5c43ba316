/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The seams through which the [consensus engine](super::implementation::Consensus) talks to the rest
//! of the node.

use std::sync::Arc;

use crate::{
    blockchain::BlockchainError,
    types::{
        block::Block,
        crypto_primitives::Keypair,
        data_types::{Height, Round, SignatureBytes, ValidatorID},
        workers::Worker,
    },
};

use super::messages::ConsensusMessage;

/// The chain that consensus decides blocks for.
pub trait ConsensusChain {
    /// Check whether `block` may be decided at the current height, without applying it.
    fn valid(&self, block: &Block) -> Result<(), BlockchainError>;

    /// Produce a fresh block for the local validator to propose.
    fn get_value(&self) -> Result<Block, BlockchainError>;

    /// Get the validator that is expected to propose in `round` of `height`, or `None` if there are no
    /// workers.
    fn get_proposer(&self, height: Height, round: Round) -> Option<ValidatorID>;

    fn get_worker_data(&self, validator: &ValidatorID) -> Option<Worker>;

    /// Get the number of validators whose votes count towards quorums.
    fn num_workers(&self) -> u64;

    /// Record that `block` has been decided.
    fn decide(&self, block: &Block) -> Result<(), BlockchainError>;
}

impl<T: ConsensusChain> ConsensusChain for Arc<T> {
    fn valid(&self, block: &Block) -> Result<(), BlockchainError> {
        self.as_ref().valid(block)
    }

    fn get_value(&self) -> Result<Block, BlockchainError> {
        self.as_ref().get_value()
    }

    fn get_proposer(&self, height: Height, round: Round) -> Option<ValidatorID> {
        self.as_ref().get_proposer(height, round)
    }

    fn get_worker_data(&self, validator: &ValidatorID) -> Option<Worker> {
        self.as_ref().get_worker_data(validator)
    }

    fn num_workers(&self) -> u64 {
        self.as_ref().num_workers()
    }

    fn decide(&self, block: &Block) -> Result<(), BlockchainError> {
        self.as_ref().decide(block)
    }
}

/// The local validator's signing identity.
pub trait ConsensusMiner {
    fn sign(&self, message: &[u8]) -> SignatureBytes;
    fn validator_id(&self) -> ValidatorID;
}

impl ConsensusMiner for Keypair {
    fn sign(&self, message: &[u8]) -> SignatureBytes {
        Keypair::sign(self, message)
    }

    fn validator_id(&self) -> ValidatorID {
        Keypair::validator_id(self)
    }
}

/// Broadcasts the local validator's consensus messages.
///
/// The engine counts its own votes only when they come back to it as messages, so every broadcast must
/// also reach the local validator. The [driver](super::driver) does that loopback when the engine runs
/// inside a node.
pub trait ConsensusNetwork {
    fn broadcast(&mut self, message: ConsensusMessage);
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits that users of [`Blockchain`](super::Blockchain) implement: observers of the chain, and the
//! verifier of the transactions that blocks carry.

use std::sync::Arc;

use crate::{
    block_index::BlockRow,
    state::ChainState,
    types::{
        block::{Block, BlockHeader},
        data_types::{PublicKeyBytes, SignatureBytes},
        transaction::{Transaction, TxScheme},
    },
};

/// Observes the blocks that a [`Blockchain`](super::Blockchain) accepts.
///
/// Notifees are called on the thread that processed the block, after the block has been persisted
/// and fork choice has run, so they must not block for long.
pub trait BlockchainNotifee {
    /// Called exactly once for every block that is newly added to the block tree. `row` is the
    /// block's row in the index.
    fn new_tip(&self, row: &Arc<BlockRow>, block: &Block);

    /// Called when a producer is caught signing two different blocks for the same slot.
    fn proposer_slashing_condition_violated(&self, _slashing: &ProposerSlashing) {}
}

/// Evidence that a producer signed two different blocks for the same slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposerSlashing {
    pub header_1: BlockHeader,
    pub header_2: BlockHeader,
    pub signature_1: SignatureBytes,
    pub signature_2: SignatureBytes,
    pub signer: PublicKeyBytes,
}

/// Verifies batches of transactions that share a [`TxScheme`].
///
/// The blockchain groups the transactions of a block by scheme and calls `verify_batch` once per
/// group, concurrently from several threads.
pub trait TxVerifier: Send + Sync {
    /// Verify `txs`, all of which have the scheme `scheme`, against `state`, the state of the parent
    /// of the block that carries them.
    fn verify_batch(
        &self,
        state: &ChainState,
        scheme: TxScheme,
        txs: &[Transaction],
    ) -> Result<(), TxVerificationError>;
}

impl<T: TxVerifier> TxVerifier for Arc<T> {
    fn verify_batch(
        &self,
        state: &ChainState,
        scheme: TxScheme,
        txs: &[Transaction],
    ) -> Result<(), TxVerificationError> {
        self.as_ref().verify_batch(state, scheme, txs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxVerificationError {
    /// The transaction at `index` of the batch is invalid.
    InvalidTransaction {
        scheme: TxScheme,
        index: usize,
        reason: String,
    },
    /// The verifier has no verification routine for `scheme`.
    UnsupportedScheme { scheme: TxScheme },
    /// The thread verifying the batch panicked.
    Panicked { scheme: TxScheme },
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Blockchain`] facade.
//!
//! ## Processing a block
//!
//! [`process_block`](Blockchain::process_block) accepts a block in the following steps. Any failing
//! step rejects the block without changing the chain.
//! 1. Check that the parent is indexed and has a derived state.
//! 2. Check the block signature. Blocks below `last_pre_workers_block` must be signed by the
//!    pre-workers key. Later blocks must be signed by a worker registered in the parent state.
//! 3. Check that the producer did not already sign a different block on the best chain for the same
//!    slot. If it did, the pair of blocks is reported as a [`ProposerSlashing`], and the block is
//!    rejected unless consensus already decided it.
//! 4. Verify the transactions, one batch per [`TxScheme`], all batches concurrently.
//! 5. Apply the state transition, append the block to the raw block log, and index and persist its
//!    row.
//! 6. Re-run fork choice.
//! 7. Notify every [`BlockchainNotifee`].
//!
//! ## Fork choice
//!
//! Starting at the justified head, fork choice repeatedly descends into the child whose subtree
//! reaches the greatest height, breaking ties in favour of the lowest hash. The leaf it ends at
//! becomes the tip of the best chain.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{mpsc::Sender, Arc, Mutex},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use borsh::BorshSerialize;

use crate::{
    block_index::BlockRow,
    consensus::ConsensusChain,
    events::*,
    params::ChainParams,
    state::{ChainState, StateService, StateServiceError, StateTransitionError},
    store::{BlockStoreError, BlockStoreWriteBatch, KVGetError, KVSetError, KVStore},
    types::{
        block::{Block, BlockHeader, BlockInv},
        crypto_primitives::{validator_id, Keypair},
        data_types::{CryptoHash, Height, PublicKeyBytes, Round, Slot, ValidatorID},
        transaction::{Transaction, TxScheme},
        workers::Worker,
    },
};

use super::interfaces::{BlockchainNotifee, ProposerSlashing, TxVerificationError, TxVerifier};

type Notifee = Arc<dyn BlockchainNotifee + Send + Sync>;

pub struct Blockchain<K: KVStore, V: TxVerifier> {
    state: StateService<K>,
    params: ChainParams,
    keypair: Keypair,
    verifier: V,
    genesis_time: u64,
    notifees: Mutex<Vec<Notifee>>,
    // Serializes `process_block` and `decide`, so that a block is never inserted or announced twice,
    // and fork choice never runs against checkpoints that are being moved.
    process_lock: Mutex<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, V: TxVerifier> Blockchain<K, V> {
    /// Open the chain stored in `kv_store`, bootstrapping it from `params` if the store is empty.
    ///
    /// The genesis time is read from the store. A store that does not have one yet gets
    /// `params.genesis_time`.
    pub fn new(
        kv_store: K,
        params: ChainParams,
        keypair: Keypair,
        verifier: V,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, BlockchainError> {
        let genesis_block = params.genesis_block();
        let state = StateService::new(kv_store, &genesis_block, params.genesis_state())?;

        let genesis_time = {
            let mut store = state.store();
            let stored_genesis_time = store.get_genesis_time()?;
            match stored_genesis_time {
                Some(genesis_time) => genesis_time,
                None => {
                    let mut wb = BlockStoreWriteBatch::new();
                    wb.set_genesis_time(params.genesis_time)?;
                    store.write(wb);
                    params.genesis_time
                }
            }
        };

        Ok(Self {
            state,
            params,
            keypair,
            verifier,
            genesis_time,
            notifees: Mutex::new(Vec::new()),
            process_lock: Mutex::new(()),
            event_publisher,
        })
    }

    /// Check `block` and, if it passes every check, add it to the block tree and re-run fork choice.
    ///
    /// Processing a block that is already in the block tree does nothing and succeeds.
    pub fn process_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let _guard = self.process_lock.lock().unwrap();
        self.process_block_locked(block, SlotConflict::Reject)
    }

    /// The body of [`process_block`](Self::process_block). The caller must hold `process_lock`.
    ///
    /// `on_conflict` says what to do with a block whose producer already signed another block on the
    /// best chain for the same slot. The conflict is reported either way.
    fn process_block_locked(&self, block: &Block, on_conflict: SlotConflict) -> Result<(), BlockchainError> {
        let hash = block.hash();
        if self.state.index().have(&hash) {
            return Ok(());
        }

        let parent_hash = block.header.prev_block_hash;
        if !self.state.index().have(&parent_hash) {
            return Err(BlockchainError::ParentNotFound {
                block: hash,
                parent: parent_hash,
            });
        }
        let parent_state = self.state.get_state_for_hash(&parent_hash).ok_or(
            BlockchainError::ParentStateNotFound {
                block: hash,
                parent: parent_hash,
            },
        )?;

        self.check_block_signature(block, &parent_state)?;
        if let Some(conflicting_block) = self.report_duplicate_slot(block)? {
            if on_conflict == SlotConflict::Reject {
                return Err(BlockchainError::DuplicateSlot {
                    block: hash,
                    conflicting_block,
                    slot: block.header.slot,
                });
            }
        }
        check_generate_txs(block.txs.iter(), 1)?;
        self.verify_txs(&parent_state, block.txs.iter())?;

        let (row, state) = self.state.add(block)?;
        Event::publish(
            &self.event_publisher,
            Event::InsertBlock(InsertBlockEvent {
                timestamp: SystemTime::now(),
                block: hash,
                height: row.height,
                slot: row.slot,
            }),
        );

        self.update_chain_head()?;
        log::debug!(
            "Processed block {} at height {} slot {} with {} transactions and {} workers",
            hash,
            row.height,
            row.slot,
            block.txs.len(),
            state.workers.len()
        );

        for notifee in self.notifees() {
            notifee.new_tip(&row, block);
        }

        Ok(())
    }

    /// Verify the transactions of every block in `inv` against the state of the tip, allowing at most
    /// one generate-coin transaction per block of the inventory.
    pub fn process_block_inv(&self, inv: &BlockInv) -> Result<(), BlockchainError> {
        check_generate_txs(inv.txs(), inv.blocks.len())?;
        let state = self
            .state
            .tip_state()
            .ok_or(StateServiceError::StateNotFound {
                block: self.state.tip().hash,
            })?;
        self.verify_txs(&state, inv.txs())
    }

    /// Record that consensus decided `block`: the block becomes the justified head, and the previous
    /// justified head becomes the finalized head.
    ///
    /// `block` is processed first if it is not in the block tree yet. A decided block is applied even if
    /// its producer signed a conflicting block for the same slot; the conflict is still reported.
    ///
    /// # Errors
    ///
    /// [`BlockchainError::NotOnJustifiedChain`] if `block` does not descend from the current justified
    /// head.
    pub fn decide(&self, block: &Block) -> Result<(), BlockchainError> {
        let _guard = self.process_lock.lock().unwrap();
        let hash = block.hash();
        if !self.state.index().have(&hash) {
            self.process_block_locked(block, SlotConflict::Apply)?;
        }

        let row = self
            .state
            .get_row_by_hash(&hash)
            .ok_or(StateServiceError::BlockNotFound { block: hash })?;
        let (justified, justified_state) = self.state.get_justified_head();
        if row.hash == justified.hash {
            return Ok(());
        }
        if row.height <= justified.height
            || row
                .get_ancestor_at_height(justified.height)
                .map(|ancestor| ancestor.hash)
                != Some(justified.hash)
        {
            return Err(BlockchainError::NotOnJustifiedChain {
                block: hash,
                justified: justified.hash,
            });
        }
        let state = self
            .state
            .get_state_for_hash(&hash)
            .ok_or(StateServiceError::StateNotFound { block: hash })?;

        self.state.set_checkpoints(
            (&justified.hash, justified_state),
            (&hash, state),
        )?;
        Event::publish(
            &self.event_publisher,
            Event::FinalizeBlock(FinalizeBlockEvent {
                timestamp: SystemTime::now(),
                block: justified.hash,
                height: justified.height,
            }),
        );

        Event::publish(
            &self.event_publisher,
            Event::JustifyBlock(JustifyBlockEvent {
                timestamp: SystemTime::now(),
                block: hash,
                height: row.height,
            }),
        );

        self.update_chain_head()?;
        self.state.remove_before_slot(justified.slot);
        log::info!(
            "Decided block {} at height {}, finalized block {} at height {}",
            hash,
            row.height,
            justified.hash,
            justified.height
        );

        Ok(())
    }

    /// Build and sign a block on top of the justified head, at the current wall-clock slot (or the
    /// slot right after the justified head's, whichever is later).
    pub fn get_value(&self) -> Result<Block, BlockchainError> {
        let (parent, parent_state) = self.state.get_justified_head();
        let now = secs_since_unix_epoch();
        let slot = self
            .params
            .slot_at(self.genesis_time, now)
            .max(parent.slot + 1);
        let state = parent_state.successor(slot);

        let header = BlockHeader {
            version: 0,
            prev_block_hash: parent.hash,
            height: parent.height + 1,
            slot,
            tx_root: CryptoHash::zero(),
            state_root: state.root(),
            timestamp: now,
        };
        Ok(Block::new(header, Vec::new(), &self.keypair))
    }

    /// Check that `block` extends the justified head and passes every check of
    /// [`process_block`](Self::process_block), without adding it to the block tree.
    pub fn valid(&self, block: &Block) -> Result<(), BlockchainError> {
        let (justified, justified_state) = self.state.get_justified_head();
        if block.header.prev_block_hash != justified.hash {
            return Err(BlockchainError::NotOnJustifiedChain {
                block: block.hash(),
                justified: justified.hash,
            });
        }

        self.check_block_signature(block, &justified_state)?;
        justified_state.process_block(block)?;
        check_generate_txs(block.txs.iter(), 1)?;
        self.verify_txs(&justified_state, block.txs.iter())
    }

    /// Get the proposer of `round` of `height`. Proposers rotate through the workers registered in the
    /// justified state in ascending order of their IDs.
    pub fn get_proposer(&self, height: Height, round: Round) -> Option<ValidatorID> {
        let (_, justified_state) = self.state.get_justified_head();
        justified_state
            .workers
            .nth_cyclic(height.wrapping_add(round))
    }

    pub fn get_worker_data(&self, validator: &ValidatorID) -> Option<Worker> {
        let (_, justified_state) = self.state.get_justified_head();
        justified_state.workers.get(validator).copied()
    }

    /// Get the number of workers registered in the justified state.
    pub fn num_workers(&self) -> u64 {
        let (_, justified_state) = self.state.get_justified_head();
        justified_state.workers.len() as u64
    }

    /// Register `notifee` to be called for every new block.
    pub fn notify(&self, notifee: Notifee) {
        self.notifees.lock().unwrap().push(notifee)
    }

    /// Unregister `notifee`. Does nothing if it was never registered.
    pub fn unnotify(&self, notifee: &Notifee) {
        self.notifees
            .lock()
            .unwrap()
            .retain(|registered| !Arc::ptr_eq(registered, notifee))
    }

    /// Read the block `hash` back from the raw block log.
    pub fn get_block(&self, hash: &CryptoHash) -> Result<Block, BlockchainError> {
        Ok(self.state.get_raw_block(hash)?)
    }

    /// Get the Borsh serialization of the block `hash`.
    pub fn get_raw_block(&self, hash: &CryptoHash) -> Result<Vec<u8>, BlockchainError> {
        Ok(self.get_block(hash)?.try_to_vec().unwrap())
    }

    pub fn genesis_time(&self) -> u64 {
        self.genesis_time
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn state(&self) -> &StateService<K> {
        &self.state
    }

    fn notifees(&self) -> Vec<Notifee> {
        self.notifees.lock().unwrap().clone()
    }

    fn check_block_signature(&self, block: &Block, parent_state: &ChainState) -> Result<(), BlockchainError> {
        if block.header.height < self.params.last_pre_workers_block {
            if block.signer != self.params.pre_workers_public_key {
                return Err(BlockchainError::UnexpectedSigner {
                    block: block.hash(),
                    signer: block.signer,
                });
            }
        } else if !parent_state.workers.contains(&validator_id(&block.signer)) {
            return Err(BlockchainError::UnknownProducer {
                block: block.hash(),
                signer: block.signer,
            });
        }

        if !block.is_correct() {
            return Err(BlockchainError::InvalidBlockSignature {
                block: block.hash(),
            });
        }
        Ok(())
    }

    /// Report `block` if its producer already signed a different block for the same slot that is on
    /// the best chain. Returns the hash of that other block.
    fn report_duplicate_slot(&self, block: &Block) -> Result<Option<CryptoHash>, BlockchainError> {
        let slot = block.header.slot;
        let Some(other) = self.state.chain().get_node_by_slot(slot) else {
            return Ok(None);
        };
        let hash = block.hash();
        if other.slot != slot || other.hash == hash {
            return Ok(None);
        }
        let other_block = self.state.get_raw_block(&other.hash)?;
        if other_block.signer != block.signer {
            return Ok(None);
        }

        log::warn!("Found duplicate block at slot {}, reporting", slot);
        Event::publish(
            &self.event_publisher,
            Event::ProposerSlashing(ProposerSlashingEvent {
                timestamp: SystemTime::now(),
                signer: block.signer,
                slot,
                block: hash,
                conflicting_block: other.hash,
            }),
        );
        let slashing = ProposerSlashing {
            header_1: block.header.clone(),
            header_2: other_block.header,
            signature_1: block.signature,
            signature_2: other_block.signature,
            signer: block.signer,
        };
        for notifee in self.notifees() {
            notifee.proposer_slashing_condition_violated(&slashing);
        }

        Ok(Some(other.hash))
    }

    /// Verify `txs` against `state`, one batch per scheme, every batch on its own thread.
    ///
    /// Every batch runs to completion. Each failing batch is logged, and the first failure (in
    /// ascending order of scheme) is returned.
    fn verify_txs<'a>(
        &self,
        state: &ChainState,
        txs: impl Iterator<Item = &'a Transaction>,
    ) -> Result<(), BlockchainError> {
        let mut batches: BTreeMap<TxScheme, Vec<Transaction>> = BTreeMap::new();
        for tx in txs {
            batches.entry(tx.scheme()).or_default().push(tx.clone());
        }
        if batches.is_empty() {
            return Ok(());
        }

        let verifier = &self.verifier;
        let results: Vec<(TxScheme, Result<(), TxVerificationError>)> = thread::scope(|s| {
            let handles: Vec<_> = batches
                .iter()
                .map(|(scheme, batch)| {
                    let scheme = *scheme;
                    (scheme, s.spawn(move || verifier.verify_batch(state, scheme, batch)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(scheme, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or(Err(TxVerificationError::Panicked { scheme }));
                    (scheme, result)
                })
                .collect()
        });

        let mut first_error = None;
        for (scheme, result) in results {
            if let Err(err) = result {
                log::warn!("Transactions of scheme {:?} failed verification: {:?}", scheme, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Move the tip of the best chain to the leaf that fork choice picks, if it is not already there.
    fn update_chain_head(&self) -> Result<(), BlockchainError> {
        let tip = self.fork_choice();
        if tip.hash == self.state.tip().hash {
            return Ok(());
        }

        self.state.set_tip(Arc::clone(&tip))?;
        Event::publish(
            &self.event_publisher,
            Event::UpdateTip(UpdateTipEvent {
                timestamp: SystemTime::now(),
                tip: tip.hash,
                height: tip.height,
            }),
        );
        Ok(())
    }

    fn fork_choice(&self) -> Arc<BlockRow> {
        let (mut head, _) = self.state.get_justified_head();
        let subtree_heights = self.subtree_heights(&head);
        loop {
            let best = head
                .children()
                .iter()
                .filter_map(|child| self.state.get_row_by_hash(child))
                .map(|child| (subtree_heights.get(&child.hash).copied().unwrap_or(child.height), child))
                .max_by(|(height_a, a), (height_b, b)| {
                    height_a.cmp(height_b).then_with(|| b.hash.cmp(&a.hash))
                });
            match best {
                Some((_, child)) => head = child,
                None => return head,
            }
        }
    }

    /// Get, for every block in the subtree rooted at `root`, the greatest height of any block in its own
    /// subtree. Every block is visited once.
    fn subtree_heights(&self, root: &Arc<BlockRow>) -> HashMap<CryptoHash, Height> {
        // Pre-order walk. A row's descendants come after it, so folding the walk in reverse sees every
        // child before its parent.
        let mut walk = Vec::new();
        let mut stack = vec![Arc::clone(root)];
        while let Some(row) = stack.pop() {
            stack.extend(
                row.children()
                    .iter()
                    .filter_map(|child| self.state.get_row_by_hash(child)),
            );
            walk.push(row);
        }

        let mut heights: HashMap<CryptoHash, Height> = HashMap::with_capacity(walk.len());
        for row in walk.iter().rev() {
            let height = row
                .children()
                .iter()
                .filter_map(|child| heights.get(child).copied())
                .fold(row.height, Height::max);
            heights.insert(row.hash, height);
        }
        heights
    }
}

impl<K: KVStore, V: TxVerifier> ConsensusChain for Blockchain<K, V> {
    fn valid(&self, block: &Block) -> Result<(), BlockchainError> {
        Blockchain::valid(self, block)
    }

    fn get_value(&self) -> Result<Block, BlockchainError> {
        Blockchain::get_value(self)
    }

    fn get_proposer(&self, height: Height, round: Round) -> Option<ValidatorID> {
        Blockchain::get_proposer(self, height, round)
    }

    fn get_worker_data(&self, validator: &ValidatorID) -> Option<Worker> {
        Blockchain::get_worker_data(self, validator)
    }

    fn num_workers(&self) -> u64 {
        Blockchain::num_workers(self)
    }

    fn decide(&self, block: &Block) -> Result<(), BlockchainError> {
        Blockchain::decide(self, block)
    }
}

/// What [`Blockchain::process_block_locked`] does with a block that conflicts with another block of the
/// same producer for the same slot.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotConflict {
    Reject,
    Apply,
}

/// Reject `txs` if more than `limit` of them generate coins.
fn check_generate_txs<'a>(
    txs: impl Iterator<Item = &'a Transaction>,
    limit: usize,
) -> Result<(), BlockchainError> {
    let found = txs
        .filter(|tx| tx.scheme() == TxScheme::GENERATE)
        .count();
    if found > limit {
        return Err(BlockchainError::TooManyGenerateTx { found, limit });
    }
    Ok(())
}

fn secs_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[derive(Debug)]
pub enum BlockchainError {
    StateServiceError(StateServiceError),
    StateTransitionError(StateTransitionError),
    TxVerificationError(TxVerificationError),
    ParentNotFound {
        block: CryptoHash,
        parent: CryptoHash,
    },
    ParentStateNotFound {
        block: CryptoHash,
        parent: CryptoHash,
    },
    /// A block below `last_pre_workers_block` is not signed by the pre-workers key.
    UnexpectedSigner {
        block: CryptoHash,
        signer: PublicKeyBytes,
    },
    /// The signer of a block is not a registered worker.
    UnknownProducer {
        block: CryptoHash,
        signer: PublicKeyBytes,
    },
    InvalidBlockSignature {
        block: CryptoHash,
    },
    /// The producer of `block` already produced `conflicting_block` for the same slot.
    DuplicateSlot {
        block: CryptoHash,
        conflicting_block: CryptoHash,
        slot: Slot,
    },
    TooManyGenerateTx {
        found: usize,
        limit: usize,
    },
    NotOnJustifiedChain {
        block: CryptoHash,
        justified: CryptoHash,
    },
}

impl From<StateServiceError> for BlockchainError {
    fn from(value: StateServiceError) -> Self {
        BlockchainError::StateServiceError(value)
    }
}

impl From<StateTransitionError> for BlockchainError {
    fn from(value: StateTransitionError) -> Self {
        BlockchainError::StateTransitionError(value)
    }
}

impl From<TxVerificationError> for BlockchainError {
    fn from(value: TxVerificationError) -> Self {
        BlockchainError::TxVerificationError(value)
    }
}

impl From<BlockStoreError> for BlockchainError {
    fn from(value: BlockStoreError) -> Self {
        BlockchainError::StateServiceError(StateServiceError::from(value))
    }
}

impl From<KVGetError> for BlockchainError {
    fn from(value: KVGetError) -> Self {
        BlockchainError::StateServiceError(StateServiceError::from(value))
    }
}

impl From<KVSetError> for BlockchainError {
    fn from(value: KVSetError) -> Self {
        BlockchainError::StateServiceError(StateServiceError::from(value))
    }
}

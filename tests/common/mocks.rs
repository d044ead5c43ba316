//! Keys, blocks, and mock implementations of the traits that the chain core is parametrized by.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use ed25519_dalek::SigningKey;
use pos_chain::{
    block_index::BlockRow,
    blockchain::{
        BlockchainError, BlockchainNotifee, ProposerSlashing, TxVerificationError, TxVerifier,
    },
    consensus::{
        Consensus, ConsensusChain, ConsensusError, ConsensusMessage, ConsensusNetwork,
    },
    state::ChainState,
    types::{
        block::{Block, BlockHeader},
        crypto_primitives::Keypair,
        data_types::{CryptoHash, Height, Round, Slot, ValidatorID},
        transaction::{Transaction, TxScheme},
        workers::{Worker, WorkerRegistry},
    },
};
use rand_core::OsRng;

/// Generate `n` keypairs, sorted by validator ID, so that `keypairs[i]` is the worker at position `i`
/// of a registry of all of them.
pub(crate) fn keypairs(n: usize) -> Vec<Keypair> {
    let mut csprg = OsRng {};
    let mut keypairs: Vec<Keypair> = (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    keypairs.sort_by_key(|keypair| keypair.validator_id());
    keypairs
}

pub(crate) fn registry(keypairs: &[Keypair]) -> WorkerRegistry {
    keypairs
        .iter()
        .map(|keypair| Worker::new(keypair.public_bytes()))
        .collect()
}

/// Build a block on top of `parent`, whose state is `parent_state`, at `slot`, signed by `producer`.
/// Returns the block and the state it produces.
pub(crate) fn child_block(
    parent: &Block,
    parent_state: &ChainState,
    slot: Slot,
    txs: Vec<Transaction>,
    producer: &Keypair,
) -> (Block, ChainState) {
    let state = parent_state.successor(slot);
    let header = BlockHeader {
        version: 0,
        prev_block_hash: parent.hash(),
        height: parent.header.height + 1,
        slot,
        tx_root: CryptoHash::zero(),
        state_root: state.root(),
        timestamp: slot,
    };
    (Block::new(header, txs, producer), state)
}

/// A block for consensus tests. Blocks with the same `parent` and `height` but a different `salt` are
/// different blocks.
pub(crate) fn mock_block(parent: CryptoHash, height: Height, salt: u64, producer: &Keypair) -> Block {
    let header = BlockHeader {
        version: 0,
        prev_block_hash: parent,
        height,
        slot: height,
        tx_root: CryptoHash::zero(),
        state_root: CryptoHash::zero(),
        timestamp: salt,
    };
    Block::new(header, Vec::new(), producer)
}

/* ↓↓↓ Transaction verifiers ↓↓↓ */

pub(crate) struct AcceptAll;

impl TxVerifier for AcceptAll {
    fn verify_batch(&self, _: &ChainState, _: TxScheme, _: &[Transaction]) -> Result<(), TxVerificationError> {
        Ok(())
    }
}

/// Rejects every batch whose scheme is in `rejected`, and records the scheme of every batch it is
/// asked to verify.
pub(crate) struct SchemeVerifier {
    rejected: HashSet<TxScheme>,
    calls: Mutex<Vec<TxScheme>>,
}

impl SchemeVerifier {
    pub(crate) fn new(rejected: impl IntoIterator<Item = TxScheme>) -> Self {
        Self {
            rejected: rejected.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<TxScheme> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl TxVerifier for SchemeVerifier {
    fn verify_batch(
        &self,
        _: &ChainState,
        scheme: TxScheme,
        txs: &[Transaction],
    ) -> Result<(), TxVerificationError> {
        self.calls.lock().unwrap().push(scheme);
        if self.rejected.contains(&scheme) {
            return Err(TxVerificationError::InvalidTransaction {
                scheme,
                index: txs.len() - 1,
                reason: String::from("rejected by test verifier"),
            });
        }
        Ok(())
    }
}

/* ↓↓↓ Notifees ↓↓↓ */

#[derive(Default)]
pub(crate) struct RecordingNotifee {
    pub(crate) new_tips: Mutex<Vec<CryptoHash>>,
    pub(crate) slashings: Mutex<Vec<ProposerSlashing>>,
}

impl BlockchainNotifee for RecordingNotifee {
    fn new_tip(&self, row: &Arc<BlockRow>, block: &Block) {
        assert_eq!(row.hash, block.hash());
        self.new_tips.lock().unwrap().push(row.hash);
    }

    fn proposer_slashing_condition_violated(&self, slashing: &ProposerSlashing) {
        self.slashings.lock().unwrap().push(slashing.clone());
    }
}

/* ↓↓↓ Consensus ↓↓↓ */

/// A [`ConsensusChain`] with a fixed set of workers that accepts every block except those marked
/// invalid, and records every decision unless told to refuse them.
pub(crate) struct MockChain {
    workers: WorkerRegistry,
    keypair: Keypair,
    decided: Mutex<Vec<Block>>,
    invalid: Mutex<HashSet<CryptoHash>>,
    refuse_decisions: AtomicBool,
}

impl MockChain {
    pub(crate) fn new(workers: WorkerRegistry, keypair: Keypair) -> Self {
        Self {
            workers,
            keypair,
            decided: Mutex::new(Vec::new()),
            invalid: Mutex::new(HashSet::new()),
            refuse_decisions: AtomicBool::new(false),
        }
    }

    pub(crate) fn decided(&self) -> Vec<Block> {
        self.decided.lock().unwrap().clone()
    }

    pub(crate) fn mark_invalid(&self, block: CryptoHash) {
        self.invalid.lock().unwrap().insert(block);
    }

    pub(crate) fn refuse_decisions(&self, refuse: bool) {
        self.refuse_decisions.store(refuse, Ordering::SeqCst);
    }
}

impl ConsensusChain for MockChain {
    fn valid(&self, block: &Block) -> Result<(), BlockchainError> {
        if self.invalid.lock().unwrap().contains(&block.hash()) {
            return Err(BlockchainError::InvalidBlockSignature {
                block: block.hash(),
            });
        }
        Ok(())
    }

    fn get_value(&self) -> Result<Block, BlockchainError> {
        let decided = self.decided.lock().unwrap();
        let parent = decided
            .last()
            .map_or(CryptoHash::zero(), |block| block.hash());
        Ok(mock_block(parent, decided.len() as Height + 1, 0, &self.keypair))
    }

    fn get_proposer(&self, height: Height, round: Round) -> Option<ValidatorID> {
        self.workers.nth_cyclic(height + round)
    }

    fn get_worker_data(&self, validator: &ValidatorID) -> Option<Worker> {
        self.workers.get(validator).copied()
    }

    fn num_workers(&self) -> u64 {
        self.workers.len() as u64
    }

    fn decide(&self, block: &Block) -> Result<(), BlockchainError> {
        if self.refuse_decisions.load(Ordering::SeqCst) {
            return Err(BlockchainError::NotOnJustifiedChain {
                block: block.hash(),
                justified: CryptoHash::zero(),
            });
        }
        self.decided.lock().unwrap().push(block.clone());
        Ok(())
    }
}

/// A [`ConsensusNetwork`] that queues every broadcast for the test to deliver.
#[derive(Clone, Default)]
pub(crate) struct Outbox(Arc<Mutex<VecDeque<ConsensusMessage>>>);

impl Outbox {
    pub(crate) fn drain(&self) -> Vec<ConsensusMessage> {
        self.0.lock().unwrap().drain(..).collect()
    }
}

impl ConsensusNetwork for Outbox {
    fn broadcast(&mut self, message: ConsensusMessage) {
        self.0.lock().unwrap().push_back(message)
    }
}

pub(crate) type TestConsensus = Consensus<Arc<MockChain>, Keypair, Outbox>;

pub(crate) fn deliver(engine: &mut TestConsensus, msg: ConsensusMessage) -> Result<(), ConsensusError> {
    match msg {
        ConsensusMessage::Proposal(proposal) => engine.on_message_proposal(proposal),
        ConsensusMessage::Prevote(prevote) => engine.on_message_prevote(prevote),
        ConsensusMessage::Precommit(precommit) => engine.on_message_precommit(precommit),
    }
}

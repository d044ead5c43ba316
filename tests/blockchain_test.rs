//! Tests for the [`Blockchain`] facade: block processing, fork choice, slashing detection, transaction
//! verification, and consensus decisions.

mod common;

use std::{
    sync::{
        mpsc::{self, Receiver},
        Arc,
    },
    thread,
};

use borsh::BorshDeserialize;
use common::{
    mem_db::MemDB,
    mocks::{child_block, keypairs, registry, AcceptAll, RecordingNotifee, SchemeVerifier},
};
use pos_chain::{
    blockchain::{Blockchain, BlockchainError, BlockchainNotifee, TxVerificationError, TxVerifier},
    events::Event,
    params::ChainParams,
    types::{
        block::{Block, BlockInv},
        crypto_primitives::Keypair,
        data_types::{CryptoHash, Slot},
        transaction::{Transaction, TxAction, TxScheme, TxType},
    },
};

fn params(workers: &[Keypair]) -> ChainParams {
    ChainParams::builder()
        .initial_workers(registry(workers))
        .build()
}

fn open<V: TxVerifier>(params: ChainParams, keypair: &Keypair, verifier: V) -> Blockchain<MemDB, V> {
    Blockchain::new(MemDB::new(), params, keypair.clone(), verifier, None).unwrap()
}

/// Build a child of `parent`, which must already have been processed by `chain`.
fn extend<V: TxVerifier>(
    chain: &Blockchain<MemDB, V>,
    parent: &Block,
    slot: Slot,
    txs: Vec<Transaction>,
    producer: &Keypair,
) -> Block {
    let parent_state = chain.state().get_state_for_hash(&parent.hash()).unwrap();
    child_block(parent, &parent_state, slot, txs, producer).0
}

fn genesis<V: TxVerifier>(chain: &Blockchain<MemDB, V>) -> Block {
    chain.params().genesis_block()
}

fn tx(tx_type: TxType, action: TxAction) -> Transaction {
    Transaction::new(tx_type, action, vec![1, 2, 3])
}

fn drain(events: &Receiver<Event>) -> Vec<Event> {
    events.try_iter().collect()
}

#[test]
fn new_blocks_notify_exactly_once() {
    let keys = keypairs(3);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let notifee = Arc::new(RecordingNotifee::default());
    let registered: Arc<dyn BlockchainNotifee + Send + Sync> = notifee.clone();
    chain.notify(Arc::clone(&registered));

    let genesis = genesis(&chain);
    let block_1 = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    chain.process_block(&block_1).unwrap();
    let block_2 = extend(&chain, &block_1, 2, Vec::new(), &keys[1]);
    chain.process_block(&block_2).unwrap();
    chain.process_block(&block_1).unwrap();

    assert_eq!(
        *notifee.new_tips.lock().unwrap(),
        vec![block_1.hash(), block_2.hash()]
    );
    assert_eq!(chain.state().tip().hash, block_2.hash());

    chain.unnotify(&registered);
    let block_3 = extend(&chain, &block_2, 3, Vec::new(), &keys[2]);
    chain.process_block(&block_3).unwrap();
    assert_eq!(notifee.new_tips.lock().unwrap().len(), 2);
    assert_eq!(chain.state().tip().hash, block_3.hash());
}

#[test]
fn blocks_with_unknown_parents_are_rejected() {
    let keys = keypairs(1);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);
    let (block_1, state_1) = child_block(&genesis, &chain.params().genesis_state(), 1, Vec::new(), &keys[0]);
    let (block_2, _) = child_block(&block_1, &state_1, 2, Vec::new(), &keys[0]);

    assert!(matches!(
        chain.process_block(&block_2),
        Err(BlockchainError::ParentNotFound { block, parent })
            if block == block_2.hash() && parent == block_1.hash()
    ));
    assert_eq!(chain.state().index().len(), 1);
}

#[test]
fn inserting_blocks_publishes_events() {
    let keys = keypairs(1);
    let (publisher, events) = mpsc::channel();
    let chain = Blockchain::new(MemDB::new(), params(&keys), keys[0].clone(), AcceptAll, Some(publisher)).unwrap();
    let genesis = genesis(&chain);

    let block = extend(&chain, &genesis, 4, Vec::new(), &keys[0]);
    chain.process_block(&block).unwrap();

    let events = drain(&events);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        Event::InsertBlock(event) if event.block == block.hash() && event.height == 1 && event.slot == 4
    ));
    assert!(matches!(
        &events[1],
        Event::UpdateTip(event) if event.tip == block.hash() && event.height == 1
    ));
}

#[test]
fn blocks_are_processed_after_the_event_bus_stops() {
    let keys = keypairs(1);
    let (publisher, events) = mpsc::channel();
    let chain = Blockchain::new(MemDB::new(), params(&keys), keys[0].clone(), AcceptAll, Some(publisher)).unwrap();
    drop(events);

    let block = extend(&chain, &genesis(&chain), 1, Vec::new(), &keys[0]);
    chain.process_block(&block).unwrap();
    chain.decide(&block).unwrap();
    assert_eq!(chain.state().get_justified_head().0.hash, block.hash());
}

#[test]
fn fork_choice_follows_the_deepest_subtree() {
    let keys = keypairs(3);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);

    // genesis -> a1 -> a2
    let a1 = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    chain.process_block(&a1).unwrap();
    let a2 = extend(&chain, &a1, 2, Vec::new(), &keys[0]);
    chain.process_block(&a2).unwrap();
    assert_eq!(chain.state().tip().hash, a2.hash());

    // genesis -> b3: a shallower branch does not move the tip.
    let b3 = extend(&chain, &genesis, 3, Vec::new(), &keys[1]);
    chain.process_block(&b3).unwrap();
    assert_eq!(chain.state().tip().hash, a2.hash());

    // genesis -> b3 -> b4 -> b5: a deeper branch does.
    let b4 = extend(&chain, &b3, 4, Vec::new(), &keys[1]);
    chain.process_block(&b4).unwrap();
    let b5 = extend(&chain, &b4, 5, Vec::new(), &keys[1]);
    chain.process_block(&b5).unwrap();
    assert_eq!(chain.state().tip().hash, b5.hash());
    assert_eq!(chain.state().height(), 3);
    assert_eq!(chain.state().chain().get_node_by_height(1).unwrap().hash, b3.hash());
}

#[test]
fn fork_choice_breaks_ties_by_lowest_hash() {
    let keys = keypairs(3);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);

    let c1 = extend(&chain, &genesis, 1, Vec::new(), &keys[1]);
    let c2 = extend(&chain, &genesis, 2, Vec::new(), &keys[2]);
    chain.process_block(&c1).unwrap();
    chain.process_block(&c2).unwrap();

    let lowest = c1.hash().min(c2.hash());
    assert_eq!(chain.state().tip().hash, lowest);
}

#[test]
fn signing_two_blocks_for_one_slot_is_reported() {
    let keys = keypairs(3);
    let (publisher, events) = mpsc::channel();
    let chain = Blockchain::new(MemDB::new(), params(&keys), keys[0].clone(), AcceptAll, Some(publisher)).unwrap();
    let notifee = Arc::new(RecordingNotifee::default());
    chain.notify(notifee.clone());
    let genesis = genesis(&chain);

    let a1 = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    chain.process_block(&a1).unwrap();
    let a2 = extend(&chain, &a1, 2, Vec::new(), &keys[1]);
    chain.process_block(&a2).unwrap();
    let _ = drain(&events);

    // Same producer, same slot as a1 (which is on the best chain), different block.
    let conflicting = extend(
        &chain,
        &genesis,
        1,
        vec![tx(TxType::Coins, TxAction::Transfer)],
        &keys[0],
    );
    assert_ne!(conflicting.hash(), a1.hash());
    assert!(matches!(
        chain.process_block(&conflicting),
        Err(BlockchainError::DuplicateSlot { block, conflicting_block, slot })
            if block == conflicting.hash() && conflicting_block == a1.hash() && slot == 1
    ));
    assert!(!chain.state().index().have(&conflicting.hash()));

    let slashings = notifee.slashings.lock().unwrap().clone();
    assert_eq!(slashings.len(), 1);
    assert_eq!(slashings[0].signer, keys[0].public_bytes());
    assert_eq!(slashings[0].header_1, conflicting.header);
    assert_eq!(slashings[0].header_2, a1.header);
    assert_eq!(slashings[0].signature_2, a1.signature);
    assert!(matches!(
        drain(&events).as_slice(),
        [Event::ProposerSlashing(event)] if event.conflicting_block == a1.hash()
    ));

    // A different producer may fork at the same slot.
    let fork = extend(&chain, &genesis, 1, Vec::new(), &keys[2]);
    chain.process_block(&fork).unwrap();
    assert_eq!(notifee.slashings.lock().unwrap().len(), 1);
    assert_eq!(chain.state().tip().hash, a2.hash());
}

#[test]
fn every_scheme_is_verified_and_the_first_failure_returned() {
    let keys = keypairs(1);
    let verifier = Arc::new(SchemeVerifier::new([
        TxScheme {
            tx_type: TxType::Worker,
            action: TxAction::Upload,
        },
        TxScheme {
            tx_type: TxType::Coins,
            action: TxAction::Transfer,
        },
    ]));
    let chain = open(params(&keys), &keys[0], Arc::clone(&verifier));
    let genesis = genesis(&chain);

    let txs = vec![
        tx(TxType::Votes, TxAction::Vote),
        tx(TxType::Worker, TxAction::Upload),
        tx(TxType::Coins, TxAction::Transfer),
        tx(TxType::Coins, TxAction::Transfer),
    ];
    let block = extend(&chain, &genesis, 1, txs, &keys[0]);

    let result = chain.process_block(&block);

    assert!(matches!(
        result,
        Err(BlockchainError::TxVerificationError(TxVerificationError::InvalidTransaction {
            scheme: TxScheme { tx_type: TxType::Coins, action: TxAction::Transfer },
            index: 1,
            ..
        }))
    ));
    let mut expected = vec![
        tx(TxType::Votes, TxAction::Vote).scheme(),
        tx(TxType::Worker, TxAction::Upload).scheme(),
        tx(TxType::Coins, TxAction::Transfer).scheme(),
    ];
    expected.sort();
    assert_eq!(verifier.calls(), expected);
    assert!(!chain.state().index().have(&block.hash()));
}

#[test]
fn at_most_one_generate_transaction_per_block() {
    let keys = keypairs(1);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);
    let generate = || tx(TxType::Coins, TxAction::Generate);

    let greedy = extend(&chain, &genesis, 1, vec![generate(), generate()], &keys[0]);
    assert!(matches!(
        chain.process_block(&greedy),
        Err(BlockchainError::TooManyGenerateTx { found: 2, limit: 1 })
    ));

    let fair = extend(&chain, &genesis, 1, vec![generate()], &keys[0]);
    chain.process_block(&fair).unwrap();

    let inv_block = |slot, txs| extend(&chain, &fair, slot, txs, &keys[0]);
    let inv = BlockInv {
        blocks: vec![
            inv_block(2, vec![generate(), generate()]),
            inv_block(3, vec![generate()]),
        ],
    };
    assert!(matches!(
        chain.process_block_inv(&inv),
        Err(BlockchainError::TooManyGenerateTx { found: 3, limit: 2 })
    ));

    let inv = BlockInv {
        blocks: vec![inv_block(2, vec![generate()]), inv_block(3, vec![generate()])],
    };
    chain.process_block_inv(&inv).unwrap();
}

#[test]
fn blocks_must_be_signed_by_a_registered_worker() {
    let keys = keypairs(1);
    let outsider = keypairs(1).remove(0);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);

    let foreign = extend(&chain, &genesis, 1, Vec::new(), &outsider);
    assert!(matches!(
        chain.process_block(&foreign),
        Err(BlockchainError::UnknownProducer { signer, .. }) if signer == outsider.public_bytes()
    ));

    let mut tampered = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    tampered.header.timestamp += 1;
    assert!(matches!(
        chain.process_block(&tampered),
        Err(BlockchainError::InvalidBlockSignature { block }) if block == tampered.hash()
    ));
    assert_eq!(chain.state().index().len(), 1);
}

#[test]
fn early_blocks_are_signed_by_the_pre_workers_key() {
    let keys = keypairs(1);
    let pre_workers = keypairs(1).remove(0);
    let params = ChainParams::builder()
        .initial_workers(registry(&keys))
        .last_pre_workers_block(2)
        .pre_workers_public_key(pre_workers.public_bytes())
        .build();
    let chain = open(params, &keys[0], AcceptAll);
    let genesis = genesis(&chain);

    let by_worker = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    assert!(matches!(
        chain.process_block(&by_worker),
        Err(BlockchainError::UnexpectedSigner { signer, .. }) if signer == keys[0].public_bytes()
    ));

    let block_1 = extend(&chain, &genesis, 1, Vec::new(), &pre_workers);
    chain.process_block(&block_1).unwrap();

    // From `last_pre_workers_block` on, only registered workers may sign.
    let block_2 = extend(&chain, &block_1, 2, Vec::new(), &pre_workers);
    assert!(matches!(
        chain.process_block(&block_2),
        Err(BlockchainError::UnknownProducer { .. })
    ));
    let block_2 = extend(&chain, &block_1, 2, Vec::new(), &keys[0]);
    chain.process_block(&block_2).unwrap();
}

#[test]
fn decide_moves_the_checkpoints() {
    let keys = keypairs(2);
    let (publisher, events) = mpsc::channel();
    let chain = Blockchain::new(MemDB::new(), params(&keys), keys[0].clone(), AcceptAll, Some(publisher)).unwrap();
    let genesis = genesis(&chain);

    let a1 = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    chain.process_block(&a1).unwrap();
    let a2 = extend(&chain, &a1, 2, Vec::new(), &keys[1]);
    chain.process_block(&a2).unwrap();
    let b3 = extend(&chain, &genesis, 3, Vec::new(), &keys[1]);
    chain.process_block(&b3).unwrap();
    let _ = drain(&events);

    chain.decide(&a1).unwrap();
    assert_eq!(chain.state().get_justified_head().0.hash, a1.hash());
    assert_eq!(chain.state().get_finalized_head().0.hash, genesis.hash());
    let events = drain(&events);
    assert!(matches!(
        events.as_slice(),
        [Event::FinalizeBlock(finalized), Event::JustifyBlock(justified)]
            if finalized.block == genesis.hash() && justified.block == a1.hash() && justified.height == 1
    ));

    // Deciding the justified head again changes nothing.
    chain.decide(&a1).unwrap();
    assert_eq!(chain.state().get_finalized_head().0.hash, genesis.hash());

    // The other branch no longer descends from the justified head.
    assert!(matches!(
        chain.decide(&b3),
        Err(BlockchainError::NotOnJustifiedChain { block, justified })
            if block == b3.hash() && justified == a1.hash()
    ));

    // A decided block that was never processed is processed first.
    let a3 = extend(&chain, &a2, 4, Vec::new(), &keys[0]);
    chain.decide(&a3).unwrap();
    assert!(chain.state().index().have(&a3.hash()));
    assert_eq!(chain.state().get_justified_head().0.hash, a3.hash());
    assert_eq!(chain.state().get_finalized_head().0.hash, a1.hash());
    assert_eq!(chain.state().tip().hash, a3.hash());
}

#[test]
fn decided_blocks_are_applied_even_if_their_slot_is_taken() {
    let keys = keypairs(2);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let notifee = Arc::new(RecordingNotifee::default());
    chain.notify(notifee.clone());
    let genesis = genesis(&chain);

    // keys[0] gossips one block for slot 1, then gets a different one for the same slot decided.
    let gossiped = extend(&chain, &genesis, 1, Vec::new(), &keys[0]);
    chain.process_block(&gossiped).unwrap();
    let decided = extend(
        &chain,
        &genesis,
        1,
        vec![tx(TxType::Coins, TxAction::Transfer)],
        &keys[0],
    );
    assert_ne!(gossiped.hash(), decided.hash());

    chain.valid(&decided).unwrap();
    chain.decide(&decided).unwrap();

    assert!(chain.state().index().have(&decided.hash()));
    assert_eq!(chain.state().get_justified_head().0.hash, decided.hash());
    assert_eq!(chain.state().tip().hash, decided.hash());
    let slashings = notifee.slashings.lock().unwrap().clone();
    assert_eq!(slashings.len(), 1);
    assert_eq!(slashings[0].header_1, decided.header);
    assert_eq!(slashings[0].header_2, gossiped.header);

    // The block that lost the slot can no longer become the tip.
    let late = extend(&chain, &gossiped, 2, Vec::new(), &keys[1]);
    chain.process_block(&late).unwrap();
    assert_eq!(chain.state().tip().hash, decided.hash());
}

#[test]
fn decisions_and_block_processing_leave_the_tip_above_the_justified_head() {
    const LENGTH: u64 = 50;
    let keys = keypairs(2);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);
    let genesis_state = chain.params().genesis_state();

    // A branch that consensus decides block by block, and a longer competing branch that is only
    // gossiped. Both fork off the genesis.
    let build_branch = |first_slot: Slot, length: u64, producer: &Keypair| {
        let mut parent = genesis.clone();
        let mut parent_state = genesis_state.clone();
        (0..length)
            .map(|i| {
                let (block, state) = child_block(&parent, &parent_state, first_slot + i, Vec::new(), producer);
                parent = block.clone();
                parent_state = state;
                block
            })
            .collect::<Vec<Block>>()
    };
    let decided = build_branch(1, LENGTH, &keys[0]);
    let gossiped = build_branch(LENGTH + 1, 2 * LENGTH, &keys[1]);
    // Its first block needs the genesis state, which is pruned once the decisions move far enough.
    chain.process_block(&gossiped[0]).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for block in &decided {
                chain.decide(block).unwrap();
            }
        });
        s.spawn(|| {
            for block in &gossiped[1..] {
                chain.process_block(block).unwrap();
            }
        });
    });

    let (justified, _) = chain.state().get_justified_head();
    let tip = chain.state().tip();
    assert_eq!(justified.hash, decided[decided.len() - 1].hash());
    assert_eq!(
        tip.get_ancestor_at_height(justified.height).unwrap().hash,
        justified.hash
    );
    assert_eq!(tip.hash, justified.hash);
    assert_eq!(
        chain.state().get_finalized_head().0.hash,
        decided[decided.len() - 2].hash()
    );
}

#[test]
fn fork_choice_follows_a_long_branch_past_side_branches() {
    let keys = keypairs(2);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);

    // A long branch with a short side branch every 50 blocks.
    let mut parent = genesis.clone();
    let mut slot = 0;
    for height in 1..=500u64 {
        slot += 1;
        let block = extend(&chain, &parent, slot, Vec::new(), &keys[0]);
        chain.process_block(&block).unwrap();
        if height % 50 == 25 {
            slot += 1;
            let side = extend(&chain, &parent, slot, Vec::new(), &keys[1]);
            chain.process_block(&side).unwrap();
        }
        parent = block;
    }

    assert_eq!(chain.state().tip().hash, parent.hash());
    assert_eq!(chain.state().height(), 500);
    assert_eq!(chain.state().index().len(), 511);
}

#[test]
fn proposals_extend_the_justified_head() {
    let keys = keypairs(3);
    let workers = registry(&keys);
    let chain = open(params(&keys), &keys[0], AcceptAll);
    let genesis = genesis(&chain);

    let value = chain.get_value().unwrap();
    assert_eq!(value.header.prev_block_hash, genesis.hash());
    assert_eq!(value.header.height, 1);
    assert!(value.header.slot >= 1);
    assert_eq!(value.signer, keys[0].public_bytes());
    assert!(value.txs.is_empty());
    chain.valid(&value).unwrap();
    assert!(!chain.state().index().have(&value.hash()));

    let a1 = extend(&chain, &genesis, 1, Vec::new(), &keys[1]);
    chain.process_block(&a1).unwrap();
    let a2 = extend(&chain, &a1, 2, Vec::new(), &keys[1]);
    assert!(matches!(
        chain.valid(&a2),
        Err(BlockchainError::NotOnJustifiedChain { justified, .. }) if justified == genesis.hash()
    ));

    let mut wrong_root = extend(&chain, &genesis, 2, Vec::new(), &keys[1]);
    wrong_root.header.state_root = CryptoHash::zero();
    let wrong_root = Block::new(wrong_root.header, Vec::new(), &keys[1]);
    assert!(matches!(
        chain.valid(&wrong_root),
        Err(BlockchainError::StateTransitionError(_))
    ));

    chain.decide(&a1).unwrap();
    let value = chain.get_value().unwrap();
    assert_eq!(value.header.prev_block_hash, a1.hash());
    chain.valid(&value).unwrap();

    assert_eq!(chain.num_workers(), 3);
    assert_eq!(chain.get_proposer(1, 0), workers.nth_cyclic(1));
    assert_eq!(chain.get_proposer(2, 2), workers.nth_cyclic(4));
    assert!(chain.get_worker_data(&keys[2].validator_id()).is_some());
    assert!(chain.get_worker_data(&keypairs(1)[0].validator_id()).is_none());
}

#[test]
fn reopening_keeps_the_genesis_time_and_the_chain() {
    let keys = keypairs(1);
    let db = MemDB::new();
    let params = ChainParams::builder()
        .initial_workers(registry(&keys))
        .genesis_time(1_000)
        .build();

    let block = {
        let chain = Blockchain::new(db.clone(), params.clone(), keys[0].clone(), AcceptAll, None).unwrap();
        let block = extend(&chain, &genesis(&chain), 1, Vec::new(), &keys[0]);
        chain.process_block(&block).unwrap();
        block
    };

    let chain = Blockchain::new(db, params, keys[0].clone(), AcceptAll, None).unwrap();
    assert_eq!(chain.genesis_time(), 1_000);
    assert_eq!(chain.state().tip().hash, block.hash());
    assert_eq!(chain.get_block(&block.hash()).unwrap(), block);

    let raw = chain.get_raw_block(&block.hash()).unwrap();
    assert_eq!(Block::try_from_slice(&raw).unwrap(), block);
}

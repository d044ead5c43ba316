//! Tests for the block tree: [`BlockIndex`], [`BlockRow`] links, the best [`Chain`], and
//! [`ChainView`]s over it.

mod common;

use std::sync::Arc;

use common::mocks::{child_block, keypairs, registry};
use pos_chain::{
    block_index::{BlockIndex, BlockIndexError, BlockRow},
    chain::{Chain, ChainView, ChainViewError},
    state::ChainState,
    types::{
        block::Block,
        crypto_primitives::Keypair,
        data_types::{BlockLocator, Slot},
    },
};

/// A block tree whose branches all fork off the genesis.
struct Tree {
    genesis: Block,
    index: BlockIndex,
    branches: Vec<Vec<Arc<BlockRow>>>,
}

/// Build a [`Tree`] with one branch per element of `branches`, each a list of slots.
fn build_tree(branches: &[&[Slot]]) -> Tree {
    let keypair: Keypair = keypairs(1).remove(0);
    let genesis_state = ChainState::genesis(registry(&[keypair.clone()]));
    let genesis = Block::genesis(genesis_state.root(), 0);
    let index = BlockIndex::init_blocks_index(&genesis);

    let branches = branches
        .iter()
        .map(|slots| {
            let mut parent = genesis.clone();
            let mut parent_state = genesis_state.clone();
            slots
                .iter()
                .map(|slot| {
                    let (block, state) = child_block(&parent, &parent_state, *slot, Vec::new(), &keypair);
                    let row = index.add(&block, BlockLocator::default()).unwrap();
                    parent = block;
                    parent_state = state;
                    row
                })
                .collect()
        })
        .collect();

    Tree {
        genesis,
        index,
        branches,
    }
}

/// Check that `chain[i].height == i` and that every row's parent is the row below it.
fn assert_chain_well_formed(chain: &Chain) {
    for height in 0..=chain.height() {
        let row = chain.get_node_by_height(height).unwrap();
        assert_eq!(row.height, height);
        if height > 0 {
            let below = chain.get_node_by_height(height - 1).unwrap();
            assert_eq!(row.parent().unwrap().hash, below.hash);
        }
    }
}

#[test]
fn add_with_missing_parent_leaves_index_untouched() {
    let keypair = keypairs(1).remove(0);
    let genesis_state = ChainState::genesis(registry(&[keypair.clone()]));
    let genesis = Block::genesis(genesis_state.root(), 0);
    let index = BlockIndex::init_blocks_index(&genesis);

    let (block_1, state_1) = child_block(&genesis, &genesis_state, 1, Vec::new(), &keypair);
    let (block_2, _) = child_block(&block_1, &state_1, 2, Vec::new(), &keypair);

    assert_eq!(
        index.add(&block_2, BlockLocator::default()).unwrap_err(),
        BlockIndexError::ParentNotFound {
            block: block_2.hash(),
            parent: block_1.hash(),
        }
    );
    assert_eq!(index.len(), 1);
    assert!(!index.have(&block_2.hash()));
    assert!(index.get(&genesis.hash()).unwrap().children().is_empty());

    let row_1 = index.add(&block_1, BlockLocator::default()).unwrap();
    assert_eq!(row_1.height, 1);
    assert_eq!(row_1.parent().unwrap().hash, genesis.hash());

    let row_2 = index.add(&block_2, BlockLocator::default()).unwrap();
    assert_eq!(row_2.height, 2);
    assert_eq!(index.len(), 3);
}

#[test]
fn adding_twice_returns_the_same_row_without_duplicating_children() {
    let keypair = keypairs(1).remove(0);
    let genesis_state = ChainState::genesis(registry(&[keypair.clone()]));
    let genesis = Block::genesis(genesis_state.root(), 0);
    let index = BlockIndex::init_blocks_index(&genesis);
    let (block, _) = child_block(&genesis, &genesis_state, 1, Vec::new(), &keypair);

    let first = index.add(&block, BlockLocator::default()).unwrap();
    let second = index.add(&block, BlockLocator::default()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(index.get(&genesis.hash()).unwrap().children(), vec![block.hash()]);
}

#[test]
fn ancestors_by_slot_and_height() {
    let tree = build_tree(&[&[3, 5, 9]]);
    let branch = &tree.branches[0];
    let tip = &branch[2];

    assert_eq!(tip.get_ancestor_at_slot(9).unwrap().hash, tip.hash);
    assert_eq!(tip.get_ancestor_at_slot(8).unwrap().hash, branch[1].hash);
    assert_eq!(tip.get_ancestor_at_slot(5).unwrap().hash, branch[1].hash);
    assert_eq!(tip.get_ancestor_at_slot(4).unwrap().hash, branch[0].hash);
    assert_eq!(tip.get_ancestor_at_slot(2).unwrap().hash, tree.genesis.hash());
    assert_eq!(tip.get_ancestor_at_slot(0).unwrap().hash, tree.genesis.hash());
    assert!(tip.get_ancestor_at_slot(10).is_none());

    assert_eq!(tip.get_ancestor_at_height(1).unwrap().hash, branch[0].hash);
    assert_eq!(tip.get_ancestor_at_height(0).unwrap().hash, tree.genesis.hash());
    assert!(tip.get_ancestor_at_height(4).is_none());
}

#[test]
fn set_tip_keeps_chain_dense_across_reorgs() {
    let tree = build_tree(&[&[1, 2, 4], &[2, 3]]);
    let (a, b) = (&tree.branches[0], &tree.branches[1]);
    let chain = Chain::new(tree.index.get(&tree.genesis.hash()).unwrap());
    assert_eq!(chain.height(), 0);

    chain.set_tip(Some(Arc::clone(&a[2])));
    assert_chain_well_formed(&chain);
    assert_eq!(chain.tip().unwrap().hash, a[2].hash);
    assert_eq!(chain.height(), 3);

    // Reorg to the shorter branch.
    chain.set_tip(Some(Arc::clone(&b[1])));
    assert_chain_well_formed(&chain);
    assert_eq!(chain.tip().unwrap().hash, b[1].hash);
    assert_eq!(chain.height(), 2);
    assert!(chain.contains(&b[0]));
    assert!(!chain.contains(&a[0]));
    assert!(chain.get_node_by_height(3).is_none());

    // And back, through a tip in the middle of the first branch.
    chain.set_tip(Some(Arc::clone(&a[1])));
    assert_chain_well_formed(&chain);
    chain.set_tip(Some(Arc::clone(&a[2])));
    assert_chain_well_formed(&chain);
    assert_eq!(chain.tip().unwrap().hash, a[2].hash);
    assert_eq!(chain.genesis().unwrap().hash, tree.genesis.hash());

    chain.set_tip(None);
    assert!(chain.tip().is_none());
    assert!(chain.genesis().is_none());
    assert_eq!(chain.height(), 0);
    assert!(chain.get_node_by_height(0).is_none());
    assert!(chain.next(&a[0]).is_none());
    assert!(!chain.contains(&a[0]));

    // An emptied chain is rebuilt from the genesis up.
    chain.set_tip(Some(Arc::clone(&b[1])));
    assert_chain_well_formed(&chain);
    assert_eq!(chain.genesis().unwrap().hash, tree.genesis.hash());
    assert_eq!(chain.height(), 2);
}

#[test]
fn next_only_follows_rows_on_the_chain() {
    let tree = build_tree(&[&[1, 2], &[3]]);
    let (a, b) = (&tree.branches[0], &tree.branches[1]);
    let chain = Chain::new(tree.index.get(&tree.genesis.hash()).unwrap());
    chain.set_tip(Some(Arc::clone(&a[1])));

    let genesis = chain.genesis().unwrap();
    assert_eq!(chain.next(&genesis).unwrap().hash, a[0].hash);
    assert_eq!(chain.next(&a[0]).unwrap().hash, a[1].hash);
    assert!(chain.next(&a[1]).is_none());
    assert!(chain.next(&b[0]).is_none());
}

#[test]
fn get_node_by_slot_on_the_chain() {
    let tree = build_tree(&[&[2, 4, 7]]);
    let branch = &tree.branches[0];
    let chain = Chain::new(tree.index.get(&tree.genesis.hash()).unwrap());
    chain.set_tip(Some(Arc::clone(&branch[2])));

    assert_eq!(chain.get_node_by_slot(3).unwrap().hash, branch[0].hash);
    assert_eq!(chain.get_node_by_slot(4).unwrap().hash, branch[1].hash);
    assert_eq!(chain.get_node_by_slot(100).unwrap().hash, branch[2].hash);
    assert_eq!(chain.get_node_by_slot(1).unwrap().hash, tree.genesis.hash());
}

#[test]
fn chain_view_resolves_slots_up_to_the_effective_tip() {
    let tree = build_tree(&[&[1, 2, 4]]);
    let branch = &tree.branches[0];
    let mut view = ChainView::new(Arc::clone(&branch[2]));

    assert_eq!(view.tip(), branch[2].hash);
    assert_eq!(view.effective_tip_slot(), 4);
    assert_eq!(view.get_last_state_root(), branch[2].state_root);
    assert_eq!(view.get_hash_by_slot(3).unwrap(), branch[1].hash);
    assert_eq!(
        view.get_hash_by_slot(5).unwrap_err(),
        ChainViewError::PastTip {
            slot: 5,
            effective_tip_slot: 4,
        }
    );

    view.set_tip_slot(9);
    assert_eq!(view.get_hash_by_slot(7).unwrap(), branch[2].hash);
    assert_eq!(view.get_hash_by_slot(9).unwrap(), branch[2].hash);
    assert!(view.get_hash_by_slot(10).is_err());
}

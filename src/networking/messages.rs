/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant that nodes exchange.

use std::mem;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    consensus::{ConsensusMessage, Precommit, Prevote, Proposal},
    types::block::{Block, BlockInv},
};

/// All message variants that nodes exchange.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`ConsensusMessage`].
    ConsensusMessage(ConsensusMessage),

    /// See: [`BlockMessage`].
    BlockMessage(BlockMessage),
}

/// Blocks gossiped outside of consensus, e.g., by peers that are catching up.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum BlockMessage {
    Block(Block),
    BlockInv(BlockInv),
}

impl From<ConsensusMessage> for Message {
    fn from(value: ConsensusMessage) -> Self {
        Message::ConsensusMessage(value)
    }
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Proposal(value))
    }
}

impl From<Prevote> for Message {
    fn from(value: Prevote) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Prevote(value))
    }
}

impl From<Precommit> for Message {
    fn from(value: Precommit) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Precommit(value))
    }
}

impl From<Block> for Message {
    fn from(value: Block) -> Self {
        Message::BlockMessage(BlockMessage::Block(value))
    }
}

impl From<BlockInv> for Message {
    fn from(value: BlockInv) -> Self {
        Message::BlockMessage(BlockMessage::BlockInv(value))
    }
}

impl ConsensusMessage {
    /// Returns the number of bytes required to store a given instance of the [`ConsensusMessage`] enum.
    pub fn size(&self) -> u64 {
        match self {
            ConsensusMessage::Proposal(_) => mem::size_of::<Proposal>() as u64,
            ConsensusMessage::Prevote(_) => mem::size_of::<Prevote>() as u64,
            ConsensusMessage::Precommit(_) => mem::size_of::<Precommit>() as u64,
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that validators exchange as part of the round-based
//! [consensus](super::implementation::Consensus) protocol.
//!
//! Every message is signed by the validator named in its `validator_id` field. The signed bytes are
//! the Borsh serialization of a tag identifying the message kind followed by every field of the
//! message except the signature (for proposals, the block is represented by its hash).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    crypto_primitives::verify_signature,
    data_types::{CryptoHash, Height, PublicKeyBytes, Round, SignatureBytes, ValidatorID},
};

use super::interfaces::ConsensusMiner;

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Prevote(Prevote),
    Precommit(Precommit),
}

impl ConsensusMessage {
    /// Returns the height associated with a given [`ConsensusMessage`].
    pub fn height(&self) -> Height {
        match self {
            ConsensusMessage::Proposal(Proposal { height, .. }) => *height,
            ConsensusMessage::Prevote(Prevote { height, .. }) => *height,
            ConsensusMessage::Precommit(Precommit { height, .. }) => *height,
        }
    }

    /// Returns the round associated with a given [`ConsensusMessage`].
    pub fn round(&self) -> Round {
        match self {
            ConsensusMessage::Proposal(Proposal { round, .. }) => *round,
            ConsensusMessage::Prevote(Prevote { round, .. }) => *round,
            ConsensusMessage::Precommit(Precommit { round, .. }) => *round,
        }
    }

    pub fn validator_id(&self) -> ValidatorID {
        match self {
            ConsensusMessage::Proposal(Proposal { validator_id, .. }) => *validator_id,
            ConsensusMessage::Prevote(Prevote { validator_id, .. }) => *validator_id,
            ConsensusMessage::Precommit(Precommit { validator_id, .. }) => *validator_id,
        }
    }
}

#[derive(Clone, Copy, BorshSerialize)]
enum MessageTag {
    Proposal,
    Prevote,
    Precommit,
}

/// A proposer's suggestion for the block to decide at `height`.
///
/// `valid_round` is the round in which the proposer saw the block gather a quorum of prevotes, or
/// `None` if the block is fresh.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    pub block: Block,
    pub valid_round: Option<Round>,
    pub validator_id: ValidatorID,
    pub signature: SignatureBytes,
}

impl Proposal {
    pub fn new(
        signer: &impl ConsensusMiner,
        height: Height,
        round: Round,
        block: Block,
        valid_round: Option<Round>,
    ) -> Proposal {
        let validator_id = signer.validator_id();
        let signature = signer.sign(&Self::message_bytes(
            height,
            round,
            &block.hash(),
            valid_round,
            &validator_id,
        ));
        Proposal {
            height,
            round,
            block,
            valid_round,
            validator_id,
            signature,
        }
    }

    /// Check that the proposal was signed by the owner of `public_key`.
    pub fn is_correct(&self, public_key: &PublicKeyBytes) -> bool {
        let message_bytes = Self::message_bytes(
            self.height,
            self.round,
            &self.block.hash(),
            self.valid_round,
            &self.validator_id,
        );
        verify_signature(public_key, &message_bytes, &self.signature)
    }

    fn message_bytes(
        height: Height,
        round: Round,
        block: &CryptoHash,
        valid_round: Option<Round>,
        validator_id: &ValidatorID,
    ) -> Vec<u8> {
        (MessageTag::Proposal, height, round, *block, valid_round, *validator_id)
            .try_to_vec()
            .unwrap()
    }
}

/// A vote in the first voting step of a round. A zero `block_hash` is a vote for nil.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Prevote {
    pub height: Height,
    pub round: Round,
    pub block_hash: CryptoHash,
    pub validator_id: ValidatorID,
    pub signature: SignatureBytes,
}

impl Prevote {
    pub fn new(signer: &impl ConsensusMiner, height: Height, round: Round, block_hash: CryptoHash) -> Prevote {
        let validator_id = signer.validator_id();
        let signature = signer.sign(&vote_bytes(
            MessageTag::Prevote,
            height,
            round,
            &block_hash,
            &validator_id,
        ));
        Prevote {
            height,
            round,
            block_hash,
            validator_id,
            signature,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.block_hash.is_zero()
    }

    pub fn is_correct(&self, public_key: &PublicKeyBytes) -> bool {
        let message_bytes = vote_bytes(
            MessageTag::Prevote,
            self.height,
            self.round,
            &self.block_hash,
            &self.validator_id,
        );
        verify_signature(public_key, &message_bytes, &self.signature)
    }
}

/// A vote in the second voting step of a round. A zero `block_hash` is a vote for nil.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Precommit {
    pub height: Height,
    pub round: Round,
    pub block_hash: CryptoHash,
    pub validator_id: ValidatorID,
    pub signature: SignatureBytes,
}

impl Precommit {
    pub fn new(signer: &impl ConsensusMiner, height: Height, round: Round, block_hash: CryptoHash) -> Precommit {
        let validator_id = signer.validator_id();
        let signature = signer.sign(&vote_bytes(
            MessageTag::Precommit,
            height,
            round,
            &block_hash,
            &validator_id,
        ));
        Precommit {
            height,
            round,
            block_hash,
            validator_id,
            signature,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.block_hash.is_zero()
    }

    pub fn is_correct(&self, public_key: &PublicKeyBytes) -> bool {
        let message_bytes = vote_bytes(
            MessageTag::Precommit,
            self.height,
            self.round,
            &self.block_hash,
            &self.validator_id,
        );
        verify_signature(public_key, &message_bytes, &self.signature)
    }
}

fn vote_bytes(
    tag: MessageTag,
    height: Height,
    round: Round,
    block_hash: &CryptoHash,
    validator_id: &ValidatorID,
) -> Vec<u8> {
    (tag, height, round, *block_hash, *validator_id)
        .try_to_vec()
        .unwrap()
}

impl From<Proposal> for ConsensusMessage {
    fn from(value: Proposal) -> Self {
        ConsensusMessage::Proposal(value)
    }
}

impl From<Prevote> for ConsensusMessage {
    fn from(value: Prevote) -> Self {
        ConsensusMessage::Prevote(value)
    }
}

impl From<Precommit> for ConsensusMessage {
    fn from(value: Precommit) -> Self {
        ConsensusMessage::Precommit(value)
    }
}

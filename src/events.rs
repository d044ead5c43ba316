/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events that the chain core emits for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::consensus::{Precommit, Prevote, Proposal, Step};
use crate::types::{
    crypto_primitives::VerifyingKey,
    data_types::{CryptoHash, Height, PublicKeyBytes, Round, Slot, ValidatorID},
};

pub enum Event {
    // Events that change persistent state.
    InsertBlock(InsertBlockEvent),
    UpdateTip(UpdateTipEvent),
    JustifyBlock(JustifyBlockEvent),
    FinalizeBlock(FinalizeBlockEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Prevote(PrevoteEvent),
    Precommit(PrecommitEvent),
    // Events that involve receiving a consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceivePrevote(ReceivePrevoteEvent),
    ReceivePrecommit(ReceivePrecommitEvent),
    // Round events.
    StartRound(StartRoundEvent),
    RoundTimeout(RoundTimeoutEvent),
    Decide(DecideEvent),
    // Misbehaviour.
    ProposerSlashing(ProposerSlashingEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            if event_publisher.send(event).is_err() {
                log::debug!("Dropped an event because the event bus has stopped");
            }
        }
    }
}

pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: Height,
    pub slot: Slot,
}

pub struct UpdateTipEvent {
    pub timestamp: SystemTime,
    pub tip: CryptoHash,
    pub height: Height,
}

pub struct JustifyBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: Height,
}

pub struct FinalizeBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: Height,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct PrevoteEvent {
    pub timestamp: SystemTime,
    pub prevote: Prevote,
}

pub struct PrecommitEvent {
    pub timestamp: SystemTime,
    pub precommit: Precommit,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: Proposal,
}

pub struct ReceivePrevoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub prevote: Prevote,
}

pub struct ReceivePrecommitEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub precommit: Precommit,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub proposer: Option<ValidatorID>,
}

pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub step: Step,
    pub timeout: Duration,
}

pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block: CryptoHash,
}

/// A producer signed two different blocks for the same slot.
pub struct ProposerSlashingEvent {
    pub timestamp: SystemTime,
    pub signer: PublicKeyBytes,
    pub slot: Slot,
    pub block: CryptoHash,
    pub conflicting_block: CryptoHash,
}

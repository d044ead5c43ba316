/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The messages a validator has accepted at its current height.

use std::collections::{HashMap, HashSet};

use crate::types::data_types::{CryptoHash, Round, ValidatorID};

use super::messages::{Precommit, Prevote, Proposal};

/// Check whether `count` votes out of `total` is strictly more than two thirds of `total`.
pub fn two_thirds(count: u64, total: u64) -> bool {
    count as u128 * 3 > total as u128 * 2
}

/// Check whether `count` votes out of `total` is strictly more than one third of `total`.
pub fn one_third(count: u64, total: u64) -> bool {
    count as u128 * 3 > total as u128
}

/// How many rounds past its current round a validator accepts messages for. Messages for later rounds
/// are dropped.
pub const ROUND_HORIZON: Round = 64;

/// Proposals, prevotes and precommits received at one height. Replaced with a fresh log every time the
/// height advances.
#[derive(Default)]
pub struct MessageLog {
    proposals: Vec<Proposal>,
    prevotes: VoteTally,
    precommits: VoteTally,
}

impl MessageLog {
    pub fn new() -> MessageLog {
        MessageLog::default()
    }

    /// Append `proposal` to the log, unless a proposal from the same validator for the same round is
    /// already there.
    pub fn receive_proposal(&mut self, proposal: Proposal) -> bool {
        let duplicate = self.proposals.iter().any(|existing| {
            existing.round == proposal.round && existing.validator_id == proposal.validator_id
        });
        if !duplicate {
            self.proposals.push(proposal);
        }
        !duplicate
    }

    pub fn receive_prevote(&mut self, prevote: &Prevote) -> bool {
        self.prevotes
            .insert(prevote.block_hash, prevote.round, prevote.validator_id)
    }

    pub fn receive_precommit(&mut self, precommit: &Precommit) -> bool {
        self.precommits
            .insert(precommit.block_hash, precommit.round, precommit.validator_id)
    }

    /// Get the proposals that satisfy `pred`, in the order they were received.
    pub fn proposals(&self, pred: impl Fn(&Proposal) -> bool) -> Vec<&Proposal> {
        self.proposals.iter().filter(|proposal| pred(proposal)).collect()
    }

    pub fn num_prevotes(&self, block_hash: &CryptoHash, round: Round) -> u64 {
        self.prevotes.count(block_hash, round)
    }

    pub fn num_precommits(&self, block_hash: &CryptoHash, round: Round) -> u64 {
        self.precommits.count(block_hash, round)
    }

    /// Get the number of distinct validators that prevoted for anything in `round`.
    pub fn prevote_round_count(&self, round: Round) -> u64 {
        self.prevotes.round_count(round)
    }

    /// Get the number of distinct validators that precommitted anything in `round`.
    pub fn precommit_round_count(&self, round: Round) -> u64 {
        self.precommits.round_count(round)
    }

    /// Get the rounds in which any precommit was received, with their distinct-voter counts.
    pub fn precommit_rounds(&self) -> impl Iterator<Item = (Round, u64)> + '_ {
        self.precommits
            .rounds
            .iter()
            .map(|(round, voters)| (*round, voters.len() as u64))
    }
}

/// Distinct voters per `(block_hash, round)`, and per round across all block hashes. Only the first vote
/// of each validator in a round is counted.
#[derive(Default)]
struct VoteTally {
    votes: HashMap<(CryptoHash, Round), HashSet<ValidatorID>>,
    rounds: HashMap<Round, HashSet<ValidatorID>>,
}

impl VoteTally {
    /// Record a vote. Returns whether the vote was counted.
    fn insert(&mut self, block_hash: CryptoHash, round: Round, voter: ValidatorID) -> bool {
        if !self.rounds.entry(round).or_default().insert(voter) {
            return false;
        }
        self.votes
            .entry((block_hash, round))
            .or_default()
            .insert(voter)
    }

    fn count(&self, block_hash: &CryptoHash, round: Round) -> u64 {
        self.votes
            .get(&(*block_hash, round))
            .map_or(0, |voters| voters.len() as u64)
    }

    fn round_count(&self, round: Round) -> u64 {
        self.rounds.get(&round).map_or(0, |voters| voters.len() as u64)
    }
}

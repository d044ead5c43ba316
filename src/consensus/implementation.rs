/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round-based consensus state machine.
//!
//! ## Rounds and steps
//!
//! Consensus decides one block per height. Each height is attempted in rounds numbered from 0, and
//! each round moves through three steps: [`Propose`](Step::Propose), [`Prevote`](Step::Prevote), and
//! [`Precommit`](Step::Precommit). The designated proposer of a round broadcasts a [`Proposal`], every
//! validator prevotes for it (or for nil), and once a block gathers more than two thirds of the
//! prevotes of a round, validators lock on it and precommit it. A block whose precommits exceed two
//! thirds of the validators in the round it was proposed in is decided.
//!
//! ## Re-evaluating the rules
//!
//! The engine does not reason incrementally. Every accepted message and every expired timeout
//! re-evaluates all of the rules below against the [`MessageLog`] of the current height:
//!
//! |Rule|Step|Condition|Action|
//! |---|---|---|---|
//! |Line 22|Propose|A fresh proposal for the current round.|Prevote it if it is valid and compatible with the lock, else prevote nil.|
//! |Line 28|Propose|A proposal for the current round carrying a `valid_round` below it, with a quorum of prevotes in `valid_round`.|Prevote it if it is valid and the lock allows it, else prevote nil.|
//! |Line 36|Prevote or later|A valid proposal for the current round with a quorum of prevotes. Fires at most once per height.|Lock and precommit it if in Prevote. Remember it as the valid block either way.|
//! |Line 44|Prevote|More than a third of the current round's prevotes are for nil.|Precommit nil.|
//! |Line 49|Any|A proposal with a quorum of precommits in its own round.|Decide it and move to round 0 of the next height.|
//! |Line 55|Any|More than a third of the validators precommitted in a round above the current one.|Jump to the highest such round.|
//!
//! ## Timeouts
//!
//! Entering a step schedules a timeout for it. Expiry of the propose timeout while still in Propose
//! prevotes nil, expiry of the prevote timeout while still in Prevote precommits nil, and expiry of
//! the precommit timeout moves to the next round. Timeouts are not driven by a clock of their own:
//! the owner of the engine calls [`tick`](Consensus::tick), and can use
//! [`next_deadline`](Consensus::next_deadline) to decide how long to wait.

use std::{
    sync::mpsc::Sender,
    time::{Instant, SystemTime},
};

use crate::{
    blockchain::BlockchainError,
    events::*,
    types::{
        block::Block,
        data_types::{CryptoHash, Height, PublicKeyBytes, Round, ValidatorID},
    },
};

use super::{
    interfaces::{ConsensusChain, ConsensusMiner, ConsensusNetwork},
    message_log::{one_third, two_thirds, MessageLog, ROUND_HORIZON},
    messages::{Precommit, Prevote, Proposal},
    timeouts::{ScheduledTimeout, Step, TimeoutConfiguration},
};

pub struct Consensus<C: ConsensusChain, M: ConsensusMiner, N: ConsensusNetwork> {
    height: Height,
    round: Round,
    step: Step,
    locked: Option<(Round, CryptoHash)>,
    valid: Option<(Round, Block)>,
    message_log: MessageLog,
    timeouts: Vec<ScheduledTimeout>,
    timeout_config: TimeoutConfiguration,
    chain: C,
    miner: M,
    network: N,
    event_publisher: Option<Sender<Event>>,
}

impl<C: ConsensusChain, M: ConsensusMiner, N: ConsensusNetwork> Consensus<C, M, N> {
    /// Create an engine that will start deciding at `height`. Nothing happens until
    /// [`initialize`](Self::initialize) is called.
    pub fn new(
        height: Height,
        chain: C,
        miner: M,
        network: N,
        timeout_config: TimeoutConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            height,
            round: 0,
            step: Step::Propose,
            locked: None,
            valid: None,
            message_log: MessageLog::new(),
            timeouts: Vec::new(),
            timeout_config,
            chain,
            miner,
            network,
            event_publisher,
        }
    }

    /// Start round 0 of the current height.
    pub fn initialize(&mut self) -> Result<(), ConsensusError> {
        self.start_round(0)
    }

    fn start_round(&mut self, round: Round) -> Result<(), ConsensusError> {
        self.round = round;
        self.step = Step::Propose;
        self.timeouts.clear();
        self.schedule_timeout(Step::Propose);

        let proposer = self.chain.get_proposer(self.height, round);
        Event::publish(
            &self.event_publisher,
            Event::StartRound(StartRoundEvent {
                timestamp: SystemTime::now(),
                height: self.height,
                round,
                proposer,
            }),
        );

        if proposer == Some(self.miner.validator_id()) {
            let (block, valid_round) = match &self.valid {
                Some((valid_round, block)) => (block.clone(), Some(*valid_round)),
                None => (self.chain.get_value()?, None),
            };
            let proposal = Proposal::new(&self.miner, self.height, round, block, valid_round);

            Event::publish(
                &self.event_publisher,
                Event::Propose(ProposeEvent {
                    timestamp: SystemTime::now(),
                    proposal: proposal.clone(),
                }),
            );
            self.network.broadcast(proposal.into());
        }

        Ok(())
    }

    /// Check that `proposal` comes from the proposer of its round, and is signed by it.
    fn check_proposer(&self, proposal: &Proposal) -> Result<(), ConsensusError> {
        let expected = self
            .chain
            .get_proposer(self.height, proposal.round)
            .ok_or(ConsensusError::MissingProposer {
                validator: proposal.validator_id,
            })?;
        if expected != proposal.validator_id {
            return Err(ConsensusError::WrongProposer {
                expected,
                found: proposal.validator_id,
            });
        }

        let proposer = self
            .chain
            .get_worker_data(&expected)
            .ok_or(ConsensusError::MissingProposer { validator: expected })?;
        if !proposal.is_correct(&proposer.pub_key) {
            return Err(ConsensusError::SignatureInvalid { validator: expected });
        }

        Ok(())
    }

    fn check_voter(
        &self,
        validator: &ValidatorID,
        is_correct: impl FnOnce(&PublicKeyBytes) -> bool,
    ) -> Result<(), ConsensusError> {
        let worker = self
            .chain
            .get_worker_data(validator)
            .ok_or(ConsensusError::MissingValidator {
                validator: *validator,
            })?;
        if !is_correct(&worker.pub_key) {
            return Err(ConsensusError::SignatureInvalid {
                validator: *validator,
            });
        }
        Ok(())
    }

    /// Accept a proposal. Proposals for other heights, or for rounds more than [`ROUND_HORIZON`] rounds
    /// ahead, are ignored.
    pub fn on_message_proposal(&mut self, proposal: Proposal) -> Result<(), ConsensusError> {
        if proposal.height != self.height || self.beyond_horizon(proposal.round) {
            return Ok(());
        }
        self.check_proposer(&proposal)?;

        if self.message_log.receive_proposal(proposal) {
            self.check_rules()?;
        }
        Ok(())
    }

    /// Accept a prevote. Prevotes for other heights, or for rounds more than [`ROUND_HORIZON`] rounds
    /// ahead, are ignored.
    pub fn on_message_prevote(&mut self, prevote: Prevote) -> Result<(), ConsensusError> {
        if prevote.height != self.height || self.beyond_horizon(prevote.round) {
            return Ok(());
        }
        self.check_voter(&prevote.validator_id, |pk| prevote.is_correct(pk))?;

        if self.message_log.receive_prevote(&prevote) {
            self.check_rules()?;
        }
        Ok(())
    }

    /// Accept a precommit. Precommits for other heights, or for rounds more than [`ROUND_HORIZON`]
    /// rounds ahead, are ignored.
    pub fn on_message_precommit(&mut self, precommit: Precommit) -> Result<(), ConsensusError> {
        if precommit.height != self.height || self.beyond_horizon(precommit.round) {
            return Ok(());
        }
        self.check_voter(&precommit.validator_id, |pk| precommit.is_correct(pk))?;

        if self.message_log.receive_precommit(&precommit) {
            self.check_rules()?;
        }
        Ok(())
    }

    /// Handle the expiry of the timeout of `step` in `round` of `height`. Expiries for a height or
    /// round that the engine has already left are ignored.
    pub fn on_timeout(&mut self, step: Step, height: Height, round: Round) -> Result<(), ConsensusError> {
        if height != self.height || round != self.round {
            return Ok(());
        }

        match step {
            Step::Propose if self.step == Step::Propose => {
                self.publish_timeout(step);
                self.prevote(CryptoHash::zero());
                self.enter_step(Step::Prevote);
            }
            Step::Prevote if self.step == Step::Prevote => {
                self.publish_timeout(step);
                self.precommit(CryptoHash::zero());
                self.enter_step(Step::Precommit);
            }
            Step::Precommit => {
                self.publish_timeout(step);
                self.start_round(round + 1)?;
            }
            _ => return Ok(()),
        }

        self.check_rules()
    }

    /// Fire every timeout whose deadline is at or before `now`.
    ///
    /// Every expired timeout is handled even if an earlier one fails. The first failure is returned.
    pub fn tick(&mut self, now: Instant) -> Result<(), ConsensusError> {
        let (expired, pending): (Vec<ScheduledTimeout>, Vec<ScheduledTimeout>) = self
            .timeouts
            .iter()
            .partition(|timeout| timeout.is_expired(now));
        self.timeouts = pending;

        let mut first_error = None;
        for timeout in expired {
            if let Err(err) = self.on_timeout(timeout.step, timeout.height, timeout.round) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Get the earliest deadline among the pending timeouts.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.iter().map(|timeout| timeout.deadline).min()
    }

    /// Re-evaluate every rule until the round stops changing.
    ///
    /// A decision that the chain refuses to record does not stop the round from advancing. The rules
    /// keep running, and the refusal is returned at the end.
    fn check_rules(&mut self) -> Result<(), ConsensusError> {
        let mut first_error = None;
        loop {
            let round = self.round;

            if self.step == Step::Propose {
                self.check_fresh_proposal_rule();
                if self.step == Step::Propose {
                    self.check_valid_round_proposal_rule();
                }
            }
            if self.step != Step::Propose && self.valid.is_none() {
                self.check_prevote_quorum_rule();
            }
            self.check_nil_prevote_rule();

            match self.check_commit_rule() {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    log::warn!(
                        "Failed to record the decision at height {} round {}: {:?}",
                        self.height,
                        self.round,
                        err
                    );
                    first_error.get_or_insert(err);
                }
            }
            self.check_round_skip_rule()?;

            if self.round == round {
                break;
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Line 22.
    fn check_fresh_proposal_rule(&mut self) {
        let round = self.round;
        let Some(block) = self
            .message_log
            .proposals(|p| p.round == round && p.valid_round.is_none())
            .first()
            .map(|p| p.block.clone())
        else {
            return;
        };

        let hash = block.hash();
        let lock_allows = match self.locked {
            None => true,
            Some((_, locked_hash)) => locked_hash == hash,
        };
        if lock_allows && self.chain.valid(&block).is_ok() {
            self.prevote(hash);
        } else {
            self.prevote(CryptoHash::zero());
        }
        self.enter_step(Step::Prevote);
    }

    /// Line 28.
    fn check_valid_round_proposal_rule(&mut self) {
        let round = self.round;
        let candidates: Vec<(Round, Block)> = self
            .message_log
            .proposals(|p| p.round == round && p.valid_round.is_some_and(|vr| vr < round))
            .into_iter()
            .filter_map(|p| p.valid_round.map(|vr| (vr, p.block.clone())))
            .collect();

        let n = self.chain.num_workers();
        for (valid_round, block) in candidates {
            let hash = block.hash();
            if !two_thirds(self.message_log.num_prevotes(&hash, valid_round), n) {
                continue;
            }

            let lock_allows = match self.locked {
                None => true,
                Some((locked_round, locked_hash)) => locked_round <= valid_round || locked_hash == hash,
            };
            if lock_allows && self.chain.valid(&block).is_ok() {
                self.prevote(hash);
            } else {
                self.prevote(CryptoHash::zero());
            }
            self.enter_step(Step::Prevote);
            break;
        }
    }

    /// Line 36.
    fn check_prevote_quorum_rule(&mut self) {
        let round = self.round;
        let candidates: Vec<Block> = self
            .message_log
            .proposals(|p| p.round == round)
            .into_iter()
            .map(|p| p.block.clone())
            .collect();

        let n = self.chain.num_workers();
        for block in candidates {
            let hash = block.hash();
            if !two_thirds(self.message_log.num_prevotes(&hash, round), n) {
                continue;
            }
            if self.chain.valid(&block).is_err() {
                continue;
            }

            if self.step == Step::Prevote {
                self.locked = Some((round, hash));
                self.precommit(hash);
                self.enter_step(Step::Precommit);
            }
            self.valid = Some((round, block));
            break;
        }
    }

    /// Line 44.
    fn check_nil_prevote_rule(&mut self) {
        if self.step != Step::Prevote {
            return;
        }
        let nil_prevotes = self
            .message_log
            .num_prevotes(&CryptoHash::zero(), self.round);
        if one_third(nil_prevotes, self.chain.num_workers()) {
            self.precommit(CryptoHash::zero());
            self.enter_step(Step::Precommit);
        }
    }

    /// Line 49. Returns whether a block was decided.
    fn check_commit_rule(&mut self) -> Result<bool, ConsensusError> {
        let n = self.chain.num_workers();
        let decided = self
            .message_log
            .proposals(|_| true)
            .into_iter()
            .find(|p| two_thirds(self.message_log.num_precommits(&p.block.hash(), p.round), n))
            .map(|p| (p.round, p.block.clone()));

        let Some((round, block)) = decided else {
            return Ok(false);
        };

        self.chain.decide(&block)?;
        Event::publish(
            &self.event_publisher,
            Event::Decide(DecideEvent {
                timestamp: SystemTime::now(),
                height: self.height,
                round,
                block: block.hash(),
            }),
        );

        self.height += 1;
        self.locked = None;
        self.valid = None;
        self.message_log = MessageLog::new();
        self.start_round(0)?;

        Ok(true)
    }

    /// Line 55.
    fn check_round_skip_rule(&mut self) -> Result<(), ConsensusError> {
        let n = self.chain.num_workers();
        let current = self.round;
        let target = self
            .message_log
            .precommit_rounds()
            .filter(|(round, voters)| *round > current && one_third(*voters, n))
            .map(|(round, _)| round)
            .max();

        if let Some(round) = target {
            self.start_round(round)?;
        }
        Ok(())
    }

    fn beyond_horizon(&self, round: Round) -> bool {
        round > self.round.saturating_add(ROUND_HORIZON)
    }

    fn prevote(&mut self, block_hash: CryptoHash) {
        let prevote = Prevote::new(&self.miner, self.height, self.round, block_hash);
        Event::publish(
            &self.event_publisher,
            Event::Prevote(PrevoteEvent {
                timestamp: SystemTime::now(),
                prevote: prevote.clone(),
            }),
        );
        self.network.broadcast(prevote.into());
    }

    fn precommit(&mut self, block_hash: CryptoHash) {
        let precommit = Precommit::new(&self.miner, self.height, self.round, block_hash);
        Event::publish(
            &self.event_publisher,
            Event::Precommit(PrecommitEvent {
                timestamp: SystemTime::now(),
                precommit: precommit.clone(),
            }),
        );
        self.network.broadcast(precommit.into());
    }

    fn enter_step(&mut self, step: Step) {
        self.step = step;
        self.schedule_timeout(step);
    }

    fn schedule_timeout(&mut self, step: Step) {
        let deadline = Instant::now() + self.timeout_config.duration(step, self.round);
        self.timeouts.push(ScheduledTimeout {
            height: self.height,
            round: self.round,
            step,
            deadline,
        });
    }

    fn publish_timeout(&self, step: Step) {
        Event::publish(
            &self.event_publisher,
            Event::RoundTimeout(RoundTimeoutEvent {
                timestamp: SystemTime::now(),
                height: self.height,
                round: self.round,
                step,
                timeout: self.timeout_config.duration(step, self.round),
            }),
        );
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Get the round and hash of the block the local validator is locked on, if any.
    pub fn locked(&self) -> Option<(Round, CryptoHash)> {
        self.locked
    }

    /// Get the round and the block last recorded as valid at this height, if any.
    pub fn valid(&self) -> Option<&(Round, Block)> {
        self.valid.as_ref()
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }
}

#[derive(Debug)]
pub enum ConsensusError {
    MissingProposer { validator: ValidatorID },
    WrongProposer { expected: ValidatorID, found: ValidatorID },
    MissingValidator { validator: ValidatorID },
    SignatureInvalid { validator: ValidatorID },
    ChainError(BlockchainError),
}

impl From<BlockchainError> for ConsensusError {
    fn from(value: BlockchainError) -> Self {
        ConsensusError::ChainError(value)
    }
}

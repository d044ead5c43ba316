/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::node::Configuration).
//!
//! The chain core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceivePrevote](crate::events::ReceivePrevoteEvent) is printed:
//!
//! ```text
//! ReceivePrevote, 1701329264, Id5u7f6, fNGCJyk, 3, 0
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the public key of the
//!   origin of the prevote.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the block
//!   prevoted for, or `nil`.
//! - The fifth and sixth values are the height and the round of the prevote.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{events::*, types::data_types::CryptoHash};

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const UPDATE_TIP: &str = "UpdateTip";
pub const JUSTIFY_BLOCK: &str = "JustifyBlock";
pub const FINALIZE_BLOCK: &str = "FinalizeBlock";

pub const PROPOSE: &str = "Propose";
pub const PREVOTE: &str = "Prevote";
pub const PRECOMMIT: &str = "Precommit";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_PREVOTE: &str = "ReceivePrevote";
pub const RECEIVE_PRECOMMIT: &str = "ReceivePrecommit";

pub const START_ROUND: &str = "StartRound";
pub const ROUND_TIMEOUT: &str = "RoundTimeout";
pub const DECIDE: &str = "Decide";

pub const PROPOSER_SLASHING: &str = "ProposerSlashing";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                first_seven_base64_chars(&insert_block_event.block.bytes()),
                insert_block_event.height,
                insert_block_event.slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateTipEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_tip_event: &UpdateTipEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_TIP,
                secs_since_unix_epoch(update_tip_event.timestamp),
                first_seven_base64_chars(&update_tip_event.tip.bytes()),
                update_tip_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for JustifyBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |justify_block_event: &JustifyBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                JUSTIFY_BLOCK,
                secs_since_unix_epoch(justify_block_event.timestamp),
                first_seven_base64_chars(&justify_block_event.block.bytes()),
                justify_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_block_event: &FinalizeBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FINALIZE_BLOCK,
                secs_since_unix_epoch(finalize_block_event.timestamp),
                first_seven_base64_chars(&finalize_block_event.block.bytes()),
                finalize_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.proposal.block.hash().bytes()),
                propose_event.proposal.height,
                propose_event.proposal.round,
                propose_event.proposal.valid_round
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrevoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prevote_event: &PrevoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREVOTE,
                secs_since_unix_epoch(prevote_event.timestamp),
                block_or_nil(&prevote_event.prevote.block_hash),
                prevote_event.prevote.height,
                prevote_event.prevote.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrecommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |precommit_event: &PrecommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PRECOMMIT,
                secs_since_unix_epoch(precommit_event.timestamp),
                block_or_nil(&precommit_event.precommit.block_hash),
                precommit_event.precommit.height,
                precommit_event.precommit.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_proposal_event.proposal.block.hash().bytes()),
                receive_proposal_event.proposal.height,
                receive_proposal_event.proposal.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrevoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_prevote_event: &ReceivePrevoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PREVOTE,
                secs_since_unix_epoch(receive_prevote_event.timestamp),
                first_seven_base64_chars(&receive_prevote_event.origin.to_bytes()),
                block_or_nil(&receive_prevote_event.prevote.block_hash),
                receive_prevote_event.prevote.height,
                receive_prevote_event.prevote.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrecommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_precommit_event: &ReceivePrecommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PRECOMMIT,
                secs_since_unix_epoch(receive_precommit_event.timestamp),
                first_seven_base64_chars(&receive_precommit_event.origin.to_bytes()),
                block_or_nil(&receive_precommit_event.precommit.block_hash),
                receive_precommit_event.precommit.height,
                receive_precommit_event.precommit.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.height,
                start_round_event.round,
                start_round_event
                    .proposer
                    .map_or(String::from("none"), |proposer| first_seven_base64_chars(&proposer.bytes()))
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_timeout_event: &RoundTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                ROUND_TIMEOUT,
                secs_since_unix_epoch(round_timeout_event.timestamp),
                round_timeout_event.height,
                round_timeout_event.round,
                round_timeout_event.step,
                round_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                first_seven_base64_chars(&decide_event.block.bytes()),
                decide_event.height,
                decide_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposerSlashingEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |proposer_slashing_event: &ProposerSlashingEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSER_SLASHING,
                secs_since_unix_epoch(proposer_slashing_event.timestamp),
                first_seven_base64_chars(&proposer_slashing_event.signer.bytes()),
                proposer_slashing_event.slot,
                first_seven_base64_chars(&proposer_slashing_event.block.bytes()),
                first_seven_base64_chars(&proposer_slashing_event.conflicting_block.bytes())
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn block_or_nil(block_hash: &CryptoHash) -> String {
    if block_hash.is_zero() {
        String::from("nil")
    } else {
        first_seven_base64_chars(&block_hash.bytes())
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

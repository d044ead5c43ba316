/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions carried by blocks.
//!
//! The chain core does not interpret transaction payloads. It only needs to know each transaction's
//! [scheme](TxScheme), i.e., its `(type, action)` pair, so that it can hand batches of transactions of
//! the same scheme to the [transaction verifier](crate::blockchain::TxVerifier) concurrently.

use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum TxType {
    Coins,
    Worker,
    Governance,
    Votes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum TxAction {
    Transfer,
    /// Mints new coins. At most one per block is allowed.
    Generate,
    Upload,
    Update,
    Remove,
    Vote,
}

/// The `(type, action)` pair that decides which verification routine a transaction goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxScheme {
    pub tx_type: TxType,
    pub action: TxAction,
}

impl TxScheme {
    pub const GENERATE: TxScheme = TxScheme {
        tx_type: TxType::Coins,
        action: TxAction::Generate,
    };
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub tx_type: TxType,
    pub action: TxAction,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(tx_type: TxType, action: TxAction, payload: Vec<u8>) -> Self {
        Self {
            tx_type,
            action,
            payload,
        }
    }

    pub fn scheme(&self) -> TxScheme {
        TxScheme {
            tx_type: self.tx_type,
            action: self.action,
        }
    }
}

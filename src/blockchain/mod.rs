/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The facade through which blocks enter the chain, and through which consensus decisions are
//! recorded.

pub mod implementation;

pub mod interfaces;

pub use implementation::{Blockchain, BlockchainError};

pub use interfaces::{BlockchainNotifee, ProposerSlashing, TxVerificationError, TxVerifier};

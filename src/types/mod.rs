/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types used throughout the crate: blocks, transactions, workers, and the byte containers and
//! cryptographic primitives they are built from.

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod transaction;

pub mod workers;

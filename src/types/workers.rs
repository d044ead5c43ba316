/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about the registered workers (validators).

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::validator_id,
    data_types::{PublicKeyBytes, ValidatorID},
};

/// A registered validator: the public key that its proposals, votes, and blocks must verify against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Worker {
    pub pub_key: PublicKeyBytes,
}

impl Worker {
    pub fn new(pub_key: PublicKeyBytes) -> Self {
        Self { pub_key }
    }

    /// The identity of the worker, i.e., the hash of its public key.
    pub fn id(&self) -> ValidatorID {
        validator_id(&self.pub_key)
    }
}

/// Stores the registered workers, keyed by their [`ValidatorID`].
///
/// ## Ordering of workers
///
/// `WorkerRegistry` iterates through workers in ascending order of their `ValidatorID`s. The proposer
/// schedule is a round robin over this order, so every node that agrees on the registry also agrees on
/// the schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WorkerRegistry {
    workers: BTreeMap<ValidatorID, Worker>,
}

impl WorkerRegistry {
    /// Create an empty worker registry.
    pub fn new() -> Self {
        Self {
            workers: BTreeMap::new(),
        }
    }

    /// Register `worker`, replacing any worker already registered under the same ID.
    pub fn add(&mut self, worker: Worker) {
        self.workers.insert(worker.id(), worker);
    }

    /// Remove the worker registered under `id`, returning it if it was registered.
    pub fn remove(&mut self, id: &ValidatorID) -> Option<Worker> {
        self.workers.remove(id)
    }

    pub fn get(&self, id: &ValidatorID) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn contains(&self, id: &ValidatorID) -> bool {
        self.workers.contains_key(id)
    }

    /// Get an iterator through the IDs of the registered workers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &ValidatorID> {
        self.workers.keys()
    }

    /// Get the ID of the worker in position `index % self.len()` of the [ordering of
    /// workers](Self#ordering-of-workers). Returns `None` if the registry is empty.
    pub fn nth_cyclic(&self, index: u64) -> Option<ValidatorID> {
        if self.workers.is_empty() {
            return None;
        }
        let position = (index % self.workers.len() as u64) as usize;
        self.workers.keys().nth(position).copied()
    }

    /// Get the number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl FromIterator<Worker> for WorkerRegistry {
    fn from_iter<T: IntoIterator<Item = Worker>>(iter: T) -> Self {
        let mut registry = WorkerRegistry::new();
        iter.into_iter().for_each(|worker| registry.add(worker));
        registry
    }
}

//! In-memory simulated chain.
//!
//! Holds a validator set, accepts submissions, confirms them after a
//! configurable number of receipt polls and fans contract events out to
//! subscribers. Failures can be scripted to exercise retry paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::chain::{
    Address, ChainClient, ChainEvent, Receipt, Subscription, SubmittedTransaction, Transaction,
};
use crate::error::{Error, Result};
use crate::utils::constants::DATA_SUBMITTED_EVENT;

#[derive(Debug)]
struct PendingTx {
    polls_remaining: u32,
    tx: Transaction,
}

#[derive(Debug, Default)]
struct ChainState {
    validators: Vec<(Address, u64)>,
    submitted: Vec<Transaction>,
    submit_failures: VecDeque<Error>,
    pending: HashMap<String, PendingTx>,
    receipts: HashMap<String, Receipt>,
    subscribers: HashMap<u64, (String, mpsc::UnboundedSender<ChainEvent>)>,
    confirmation_polls: u32,
    never_confirm: bool,
    unavailable: bool,
    gas_price: u64,
}

/// Deterministic chain simulation
#[derive(Debug, Default)]
pub struct InMemoryChain {
    state: Mutex<ChainState>,
    block_height: AtomicU64,
    next_id: AtomicU64,
}

impl InMemoryChain {
    /// Empty chain with no validators
    pub fn new() -> Self {
        let chain = Self::default();
        chain.state.lock().gas_price = 100;
        chain
    }

    /// Chain with the given validator set
    pub fn with_validators<I, S>(validators: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<Address>,
    {
        let chain = Self::new();
        chain.set_validators(validators);
        chain
    }

    /// Replace the validator set
    pub fn set_validators<I, S>(&self, validators: I)
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<Address>,
    {
        self.state.lock().validators = validators
            .into_iter()
            .map(|(addr, stake)| (addr.into(), stake))
            .collect();
    }

    /// Make the next submission attempt fail with `error`
    pub fn fail_next_submit(&self, error: Error) {
        self.state.lock().submit_failures.push_back(error);
    }

    /// Number of receipt polls that report "pending" before confirmation
    pub fn set_confirmation_polls(&self, polls: u32) {
        self.state.lock().confirmation_polls = polls;
    }

    /// Never confirm any transaction
    pub fn set_never_confirm(&self, never: bool) {
        self.state.lock().never_confirm = never;
    }

    /// Simulate an unreachable node: validator reads fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Set the reported gas price
    pub fn set_gas_price(&self, price: u64) {
        self.state.lock().gas_price = price;
    }

    /// Every accepted transaction, in submission order
    pub fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().submitted.clone()
    }

    /// Number of submission attempts that reached the chain
    pub fn submission_count(&self) -> usize {
        self.state.lock().submitted.len()
    }

    /// Number of open event subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Current simulated block height
    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::SeqCst)
    }

    /// Deliver an event to every matching subscriber
    pub fn emit(&self, event: ChainEvent) {
        let mut state = self.state.lock();
        state.subscribers.retain(|_, (name, tx)| {
            if *name == event.name {
                tx.send(event.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    fn tx_hash(&self, tx: &Transaction, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(nonce.to_be_bytes());
        hasher.update(tx.function.as_bytes());
        for arg in &tx.arguments {
            hasher.update(arg.to_string().as_bytes());
        }
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn validators(&self) -> Result<Vec<Address>> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(Error::Chain("node unreachable".into()));
        }
        Ok(state.validators.iter().map(|(addr, _)| addr.clone()).collect())
    }

    async fn validator_stake(&self, address: &str) -> Result<u64> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(Error::Chain("node unreachable".into()));
        }
        state
            .validators
            .iter()
            .find(|(addr, _)| addr == address)
            .map(|(_, stake)| *stake)
            .ok_or_else(|| Error::ValidatorNotFound(address.to_string()))
    }

    async fn sign_and_submit(&self, tx: &Transaction) -> Result<SubmittedTransaction> {
        let nonce = self.next_id.fetch_add(1, Ordering::SeqCst);
        let hash = self.tx_hash(tx, nonce);
        let mut state = self.state.lock();

        state.submitted.push(tx.clone());
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }

        let polls_remaining = state.confirmation_polls;
        state.pending.insert(
            hash.clone(),
            PendingTx {
                polls_remaining,
                tx: tx.clone(),
            },
        );

        Ok(SubmittedTransaction { hash })
    }

    async fn wait_for_transaction(&self, hash: &str) -> Result<Receipt> {
        let confirmed = {
            let mut state = self.state.lock();

            if let Some(receipt) = state.receipts.get(hash) {
                return Ok(receipt.clone());
            }
            if state.never_confirm {
                return Err(Error::Chain(format!("transaction {} pending", hash)));
            }

            let pending = state
                .pending
                .get_mut(hash)
                .ok_or_else(|| Error::Chain(format!("transaction {} not found", hash)))?;

            if pending.polls_remaining > 0 {
                pending.polls_remaining -= 1;
                return Err(Error::Chain(format!("transaction {} pending", hash)));
            }

            let pending = state
                .pending
                .remove(hash)
                .ok_or_else(|| Error::Internal("pending transaction vanished".into()))?;
            let block_number = self.block_height.fetch_add(1, Ordering::SeqCst) + 1;
            let receipt = Receipt {
                hash: hash.to_string(),
                block_number,
                gas_used: Some(21_000),
                success: true,
            };
            state.receipts.insert(hash.to_string(), receipt.clone());
            (receipt, pending.tx)
        };

        let (receipt, tx) = confirmed;
        self.emit(ChainEvent {
            name: DATA_SUBMITTED_EVENT.to_string(),
            data: serde_json::json!({ "hash": receipt.hash, "arguments": tx.arguments }),
            block_number: Some(receipt.block_number),
        });

        Ok(receipt)
    }

    async fn subscribe(&self, event: &str) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, receiver) = mpsc::unbounded_channel();
        self.state
            .lock()
            .subscribers
            .insert(id, (event.to_string(), tx));

        Ok(Subscription {
            id,
            event: event.to_string(),
            receiver,
        })
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.state.lock().subscribers.remove(&subscription_id);
        Ok(())
    }

    async fn gas_price(&self) -> Result<u64> {
        Ok(self.state.lock().gas_price)
    }

    async fn estimate_gas(&self, tx: &Transaction) -> Result<u64> {
        let payload: usize = tx.arguments.iter().map(|a| a.to_string().len()).sum();
        Ok(21_000 + 16 * payload as u64)
    }
}

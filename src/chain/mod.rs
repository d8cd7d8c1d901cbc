//! Chain client abstraction.
//!
//! The node never talks to a blockchain directly; everything goes through
//! [`ChainClient`]. Two implementations ship with the crate:
//! - [`JsonRpcChainClient`]: JSON-RPC 2.0 over HTTP to a node gateway
//! - [`InMemoryChain`]: deterministic simulated chain for tests and dry runs

pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::InMemoryChain;
pub use rpc::JsonRpcChainClient;

/// Validator account identifier
pub type Address = String;

/// Contract call to be signed and submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Fully qualified contract function
    pub function: String,
    /// Call arguments
    pub arguments: Vec<serde_json::Value>,
}

impl Transaction {
    /// Create a new contract call
    pub fn new(function: impl Into<String>, arguments: Vec<serde_json::Value>) -> Self {
        Self {
            function: function.into(),
            arguments,
        }
    }
}

/// Chain response to an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    /// Transaction hash
    pub hash: String,
}

/// Receipt of a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction hash
    pub hash: String,
    /// Block that included the transaction
    pub block_number: u64,
    /// Gas consumed, when reported
    #[serde(default)]
    pub gas_used: Option<u64>,
    /// Execution status
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

/// Contract event delivered to a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Event name
    pub name: String,
    /// Event payload
    pub data: serde_json::Value,
    /// Block that emitted the event
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// Live event subscription; events arrive on `receiver`
#[derive(Debug)]
pub struct Subscription {
    /// Identifier to pass to `unsubscribe`
    pub id: u64,
    /// Subscribed event name
    pub event: String,
    /// Event stream
    pub receiver: mpsc::UnboundedReceiver<ChainEvent>,
}

/// Capabilities the node needs from a blockchain
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Addresses of all registered validators
    async fn validators(&self) -> Result<Vec<Address>>;

    /// Stake held by a validator
    async fn validator_stake(&self, address: &str) -> Result<u64>;

    /// Sign and broadcast a transaction
    async fn sign_and_submit(&self, tx: &Transaction) -> Result<SubmittedTransaction>;

    /// Receipt of a transaction; errors while it is still pending
    async fn wait_for_transaction(&self, hash: &str) -> Result<Receipt>;

    /// Start receiving a contract event
    async fn subscribe(&self, event: &str) -> Result<Subscription>;

    /// Stop a subscription
    async fn unsubscribe(&self, subscription_id: u64) -> Result<()>;

    /// Current gas price
    async fn gas_price(&self) -> Result<u64>;

    /// Gas estimate for a transaction
    async fn estimate_gas(&self, tx: &Transaction) -> Result<u64>;
}

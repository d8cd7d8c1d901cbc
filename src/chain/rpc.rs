//! JSON-RPC 2.0 chain client.
//!
//! Talks to a node gateway exposing the `oracle_*` method family. Event
//! subscriptions are served by polling `oracle_getEvents` from a background
//! task per subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chain::{
    Address, ChainClient, ChainEvent, Receipt, Subscription, SubmittedTransaction, Transaction,
};
use crate::config::ChainConfig;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct RpcTransport {
    client: Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl RpcTransport {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Chain(format!("{} request failed: {}", method, e)))?
            .json()
            .await
            .map_err(|e| Error::Chain(format!("{} returned malformed response: {}", method, e)))?;

        if let Some(err) = response.error {
            return Err(Error::Chain(format!("{} (code {})", err.message, err.code)));
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result)
            .map_err(|e| Error::Chain(format!("{} returned unexpected result: {}", method, e)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain client backed by a JSON-RPC gateway
#[derive(Debug)]
pub struct JsonRpcChainClient {
    transport: RpcTransport,
    config: ChainConfig,
    subscriptions: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl JsonRpcChainClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create RPC client: {}", e)))?;

        Ok(Self {
            transport: RpcTransport {
                client,
                url: config.rpc_url.clone(),
                next_id: Arc::new(AtomicU64::new(1)),
            },
            config: config.clone(),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// RPC endpoint
    pub fn endpoint(&self) -> &str {
        &self.transport.url
    }

    fn contract_call(&self, tx: &Transaction) -> serde_json::Value {
        json!({
            "contract": self.config.oracle_contract,
            "function": tx.function,
            "arguments": tx.arguments,
        })
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn validators(&self) -> Result<Vec<Address>> {
        self.transport
            .call("oracle_getValidators", json!([self.config.staking_contract]))
            .await
    }

    async fn validator_stake(&self, address: &str) -> Result<u64> {
        self.transport
            .call(
                "oracle_getValidatorStake",
                json!([self.config.staking_contract, address]),
            )
            .await
    }

    async fn sign_and_submit(&self, tx: &Transaction) -> Result<SubmittedTransaction> {
        self.transport
            .call("oracle_signAndSubmitTransaction", json!([self.contract_call(tx)]))
            .await
    }

    async fn wait_for_transaction(&self, hash: &str) -> Result<Receipt> {
        let receipt: Option<Receipt> = self
            .transport
            .call("oracle_getTransactionReceipt", json!([hash]))
            .await?;
        receipt.ok_or_else(|| Error::Chain(format!("transaction {} pending", hash)))
    }

    async fn subscribe(&self, event: &str) -> Result<Subscription> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::unbounded_channel();

        let transport = self.transport.clone();
        let contract = self.config.oracle_contract.clone();
        let event_name = event.to_string();
        let poll = Duration::from_millis(self.config.event_poll_interval_ms);

        let handle = tokio::spawn(async move {
            let mut from_block: Option<u64> = None;
            loop {
                tokio::time::sleep(poll).await;
                let events: Vec<ChainEvent> = match transport
                    .call("oracle_getEvents", json!([contract, event_name, from_block]))
                    .await
                {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::debug!(event = %event_name, error = %e, "event poll failed");
                        continue;
                    }
                };

                for event in events {
                    if let Some(block) = event.block_number {
                        from_block = Some(from_block.map_or(block + 1, |b| b.max(block + 1)));
                    }
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        self.subscriptions.lock().insert(id, handle);
        Ok(Subscription {
            id,
            event: event.to_string(),
            receiver,
        })
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        if let Some(handle) = self.subscriptions.lock().remove(&subscription_id) {
            handle.abort();
        }
        Ok(())
    }

    async fn gas_price(&self) -> Result<u64> {
        self.transport.call("oracle_gasPrice", json!([])).await
    }

    async fn estimate_gas(&self, tx: &Transaction) -> Result<u64> {
        self.transport
            .call("oracle_estimateGas", json!([self.contract_call(tx)]))
            .await
    }
}

impl Drop for JsonRpcChainClient {
    fn drop(&mut self) {
        for (_, handle) in self.subscriptions.lock().drain() {
            handle.abort();
        }
    }
}

//! Coordinator event bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::chain::Address;
use crate::consensus::round::RoundId;
use crate::oracle::FeedValue;
use crate::utils::constants::EVENT_CHANNEL_CAPACITY;

/// Event published by the validator coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A new leader won the stake-weighted draw
    LeaderElected {
        /// Elected validator
        leader: Address,
        /// Stake of the elected validator
        stake: u64,
        /// Monotonic election counter
        election_round: u64,
    },
    /// A consensus round was opened
    RoundCreated {
        /// Round identifier
        round_id: RoundId,
        /// Request the round decides on
        request_id: u64,
        /// Leader at creation time
        leader: Address,
    },
    /// A round was finalized
    ConsensusReached {
        /// Round identifier
        round_id: RoundId,
        /// Request the round decided on
        request_id: u64,
        /// Plurality value
        value: FeedValue,
    },
}

/// Publish/subscribe channel for [`CoordinatorEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; returns the number of subscribers reached
    pub fn publish(&self, event: CoordinatorEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

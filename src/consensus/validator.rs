//! Validator registry.
//!
//! Validators are loaded from the staking contract and kept for the whole
//! session. Activity and consensus outcomes update them in place.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::{Address, ChainClient};
use crate::error::{Error, Result};
use crate::utils::constants::VALIDATOR_ACTIVITY_WINDOW;

/// A staked validator known to the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Account address
    pub address: Address,
    /// Stake held in the staking contract
    pub stake: u64,
    /// Last time the validator was seen
    pub last_active_at: DateTime<Utc>,
    /// Submissions that matched the consensus value
    pub successful_submissions: u64,
    /// Submissions to finalized rounds
    pub total_submissions: u64,
    /// `successful / total`, 1.0 until the first refresh with data
    pub performance: f64,
}

impl Validator {
    /// Fresh validator record
    pub fn new(address: impl Into<Address>, stake: u64, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            stake,
            last_active_at: now,
            successful_submissions: 0,
            total_submissions: 0,
            performance: 1.0,
        }
    }

    /// Seen within `window` of `now`
    pub fn is_active_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now.signed_duration_since(self.last_active_at) < window,
            Err(_) => true,
        }
    }

    fn refresh_performance(&mut self) -> bool {
        if self.total_submissions == 0 {
            return false;
        }
        self.performance = self.successful_submissions as f64 / self.total_submissions as f64;
        true
    }
}

/// Registry of validators in chain order
#[derive(Debug)]
pub struct ValidatorRegistry {
    validators: RwLock<Vec<Validator>>,
    activity_window: Duration,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new(VALIDATOR_ACTIVITY_WINDOW)
    }
}

impl ValidatorRegistry {
    /// Empty registry
    pub fn new(activity_window: Duration) -> Self {
        Self {
            validators: RwLock::new(Vec::new()),
            activity_window,
        }
    }

    /// Load validators and stakes from the chain.
    ///
    /// New addresses are appended with fresh counters; known ones only get
    /// their stake refreshed. Returns the registry size.
    pub async fn load(&self, chain: &dyn ChainClient) -> Result<usize> {
        let addresses = chain.validators().await?;

        let mut loaded = Vec::with_capacity(addresses.len());
        for address in addresses {
            let stake = chain.validator_stake(&address).await?;
            loaded.push((address, stake));
        }

        let now = Utc::now();
        let mut validators = self.validators.write();
        for (address, stake) in loaded {
            match validators.iter_mut().find(|v| v.address == address) {
                Some(existing) => existing.stake = stake,
                None => validators.push(Validator::new(address, stake, now)),
            }
        }

        info!(count = validators.len(), "Validator registry loaded");
        Ok(validators.len())
    }

    /// Insert or replace a validator
    pub fn upsert(&self, validator: Validator) {
        let mut validators = self.validators.write();
        match validators.iter_mut().find(|v| v.address == validator.address) {
            Some(existing) => *existing = validator,
            None => validators.push(validator),
        }
    }

    /// Number of known validators
    pub fn len(&self) -> usize {
        self.validators.read().len()
    }

    /// True if no validator is known
    pub fn is_empty(&self) -> bool {
        self.validators.read().is_empty()
    }

    /// Activity window
    pub fn activity_window(&self) -> Duration {
        self.activity_window
    }

    /// Every address, in registry order
    pub fn addresses(&self) -> Vec<Address> {
        self.validators.read().iter().map(|v| v.address.clone()).collect()
    }

    /// Snapshot of a validator
    pub fn get(&self, address: &str) -> Option<Validator> {
        self.validators.read().iter().find(|v| v.address == address).cloned()
    }

    /// Validators active at `now`, in registry order
    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<Validator> {
        self.validators
            .read()
            .iter()
            .filter(|v| v.is_active_at(now, self.activity_window))
            .cloned()
            .collect()
    }

    /// Validators active now
    pub fn active(&self) -> Vec<Validator> {
        self.active_at(Utc::now())
    }

    fn with_validator<T>(&self, address: &str, f: impl FnOnce(&mut Validator) -> T) -> Result<T> {
        let mut validators = self.validators.write();
        validators
            .iter_mut()
            .find(|v| v.address == address)
            .map(f)
            .ok_or_else(|| Error::ValidatorNotFound(address.to_string()))
    }

    /// Set a validator's last activity time
    pub fn touch(&self, address: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_validator(address, |v| v.last_active_at = at)
    }

    /// Mark a validator active after it voted in a round
    pub fn mark_active(&self, address: &str) -> Result<()> {
        self.touch(address, Utc::now())
    }

    /// Count a direct data submission and mark the validator active.
    ///
    /// Pair with [`record_success`](Self::record_success) once the data lands
    /// on-chain.
    pub fn record_submission(&self, address: &str) -> Result<()> {
        let total = self.with_validator(address, |v| {
            v.last_active_at = Utc::now();
            v.total_submissions += 1;
            v.total_submissions
        })?;
        debug!(validator = %address, total, "Validator submission recorded");
        Ok(())
    }

    /// Credit a direct data submission that confirmed on-chain
    pub fn record_success(&self, address: &str) -> Result<()> {
        self.with_validator(address, |v| v.successful_submissions += 1)
    }

    /// Apply finalized-round outcomes to submission counters
    pub fn apply_outcomes(&self, outcomes: &[(Address, bool)]) {
        let mut validators = self.validators.write();
        for (address, agreed) in outcomes {
            if let Some(validator) = validators.iter_mut().find(|v| &v.address == address) {
                validator.total_submissions += 1;
                if *agreed {
                    validator.successful_submissions += 1;
                }
            }
        }
    }

    /// Recompute performance for validators with at least one submission.
    ///
    /// Returns how many were updated.
    pub fn refresh_performance(&self) -> usize {
        let updated = self
            .validators
            .write()
            .iter_mut()
            .map(|v| v.refresh_performance())
            .filter(|changed| *changed)
            .count();
        debug!(updated, "Validator performance refreshed");
        updated
    }

    /// Performance score of one validator
    pub fn validator_performance(&self, address: &str) -> Result<f64> {
        self.get(address)
            .map(|v| v.performance)
            .ok_or_else(|| Error::ValidatorNotFound(address.to_string()))
    }

    /// Performance of every validator, in registry order
    pub fn all_validator_performances(&self) -> Vec<(Address, f64)> {
        self.validators
            .read()
            .iter()
            .map(|v| (v.address.clone(), v.performance))
            .collect()
    }
}

//! Stake-weighted leader election.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use crate::chain::Address;
use crate::consensus::events::{CoordinatorEvent, EventBus};
use crate::consensus::validator::{Validator, ValidatorRegistry};

/// Pick a candidate with probability proportional to stake.
///
/// Draws a point in `[0, total_stake)` and walks the candidates in order,
/// returning the first whose cumulative stake exceeds it. Falls back to the
/// first candidate when the total stake is zero.
pub fn select_weighted<'a, R>(candidates: &'a [Validator], rng: &mut R) -> Option<&'a Validator>
where
    R: Rng + ?Sized,
{
    let first = candidates.first()?;

    let total_stake: u128 = candidates.iter().map(|v| v.stake as u128).sum();
    if total_stake == 0 {
        return Some(first);
    }

    let point = rng.gen_range(0..total_stake);
    let mut accumulated = 0u128;
    for candidate in candidates {
        accumulated += candidate.stake as u128;
        if accumulated > point {
            return Some(candidate);
        }
    }

    Some(first)
}

/// Periodic leader elector
#[derive(Debug)]
pub struct LeaderElector {
    registry: Arc<ValidatorRegistry>,
    events: EventBus,
    current_leader: RwLock<Option<Address>>,
    election_round: AtomicU64,
}

impl LeaderElector {
    /// Create an elector over `registry`
    pub fn new(registry: Arc<ValidatorRegistry>, events: EventBus) -> Self {
        Self {
            registry,
            events,
            current_leader: RwLock::new(None),
            election_round: AtomicU64::new(0),
        }
    }

    /// Run one election with the thread-local RNG
    pub fn elect(&self) -> Option<Address> {
        let winner = {
            let active = self.registry.active_at(Utc::now());
            select_weighted(&active, &mut rand::thread_rng()).cloned()
        };
        self.install(winner)
    }

    /// Run one election with a caller-supplied RNG
    pub fn elect_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Address> {
        let active = self.registry.active_at(Utc::now());
        let winner = select_weighted(&active, rng).cloned();
        self.install(winner)
    }

    fn install(&self, winner: Option<Validator>) -> Option<Address> {
        // every attempt advances the round, skipped ones included
        let election_round = self.election_round.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(winner) = winner else {
            warn!(election_round, "No active validators, skipping leader election");
            return None;
        };

        *self.current_leader.write() = Some(winner.address.clone());

        info!(
            leader = %winner.address,
            stake = winner.stake,
            election_round,
            "New leader elected"
        );
        self.events.publish(CoordinatorEvent::LeaderElected {
            leader: winner.address.clone(),
            stake: winner.stake,
            election_round,
        });

        Some(winner.address)
    }

    /// Most recently elected leader
    pub fn current_leader(&self) -> Option<Address> {
        self.current_leader.read().clone()
    }

    /// Number of election attempts so far
    pub fn election_round(&self) -> u64 {
        self.election_round.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn validators(stakes: &[(&str, u64)]) -> Vec<Validator> {
        let now = Utc::now();
        stakes
            .iter()
            .map(|(addr, stake)| Validator::new(*addr, *stake, now))
            .collect()
    }

    #[test]
    fn test_selection_frequency_follows_stake() {
        let candidates = validators(&[("a", 100), ("b", 200), ("c", 300)]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = [0usize; 3];

        let draws = 60_000;
        for _ in 0..draws {
            let winner = select_weighted(&candidates, &mut rng).unwrap();
            let idx = candidates.iter().position(|v| v.address == winner.address).unwrap();
            counts[idx] += 1;
        }

        let expected = [1.0 / 6.0, 2.0 / 6.0, 3.0 / 6.0];
        for (count, expected) in counts.iter().zip(expected) {
            let freq = *count as f64 / draws as f64;
            assert!((freq - expected).abs() < 0.01, "freq {} vs {}", freq, expected);
        }
    }

    #[test]
    fn test_zero_stake_falls_back_to_first() {
        let candidates = validators(&[("a", 0), ("b", 0)]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_weighted(&candidates, &mut rng).unwrap().address, "a");
        assert!(select_weighted(&[], &mut rng).is_none());
    }

    #[test]
    fn test_zero_stake_member_never_wins() {
        let candidates = validators(&[("a", 0), ("b", 5)]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            assert_eq!(select_weighted(&candidates, &mut rng).unwrap().address, "b");
        }
    }

    #[test]
    fn test_stale_validator_never_elected() {
        let registry = Arc::new(ValidatorRegistry::default());
        let now = Utc::now();
        registry.upsert(Validator::new("fresh", 1, now));
        registry.upsert(Validator::new("stale", 1_000_000, now));
        registry
            .touch("stale", now - chrono::Duration::minutes(11))
            .unwrap();

        let elector = LeaderElector::new(registry, EventBus::default());
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            assert_eq!(elector.elect_with(&mut rng).as_deref(), Some("fresh"));
        }
        assert_eq!(elector.election_round(), 200);
    }

    #[tokio::test]
    async fn test_no_active_validators_skips() {
        let registry = Arc::new(ValidatorRegistry::default());
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let elector = LeaderElector::new(registry.clone(), bus);

        assert!(elector.elect().is_none());
        assert_eq!(elector.election_round(), 1);
        assert!(elector.current_leader().is_none());
        assert!(rx.try_recv().is_err());

        registry.upsert(Validator::new("a", 10, Utc::now()));
        assert_eq!(elector.elect().as_deref(), Some("a"));
        assert_eq!(elector.current_leader().as_deref(), Some("a"));
        assert_eq!(elector.election_round(), 2);

        match rx.recv().await.unwrap() {
            CoordinatorEvent::LeaderElected { leader, election_round, .. } => {
                assert_eq!(leader, "a");
                assert_eq!(election_round, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

//! Validator coordinator.
//!
//! Opens consensus rounds, collects validator submissions and finalizes rounds
//! by plurality. The comparison that decides finalization runs under the round
//! store lock, so exactly one caller finalizes a round.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::chain::{Address, ChainClient};
use crate::config::ConsensusConfig;
use crate::consensus::election::LeaderElector;
use crate::consensus::events::{CoordinatorEvent, EventBus};
use crate::consensus::round::{ConsensusRound, DataRequest, RoundId, SubmissionOutcome};
use crate::consensus::validator::ValidatorRegistry;
use crate::error::{Error, Result};
use crate::oracle::FeedValue;
use crate::utils::PeriodicTask;

/// Result of a validator submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Recorded; the round is still collecting
    Recorded {
        /// Submissions so far
        submissions: usize,
        /// Participants expected
        participants: usize,
    },
    /// This submission completed the round
    Finalized(FeedValue),
}

/// Round bookkeeping and validator scheduling
#[derive(Debug)]
pub struct ConsensusCoordinator {
    registry: Arc<ValidatorRegistry>,
    elector: Arc<LeaderElector>,
    rounds: TtlCache<RoundId, ConsensusRound>,
    events: EventBus,
    config: ConsensusConfig,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl ConsensusCoordinator {
    /// Create a coordinator with an empty registry
    pub fn new(config: ConsensusConfig) -> Self {
        let registry = Arc::new(ValidatorRegistry::new(Duration::from_secs(
            config.activity_window_secs,
        )));
        Self::with_registry(registry, config)
    }

    /// Create a coordinator over an existing registry
    pub fn with_registry(registry: Arc<ValidatorRegistry>, config: ConsensusConfig) -> Self {
        let events = EventBus::default();
        let elector = Arc::new(LeaderElector::new(registry.clone(), events.clone()));
        Self {
            registry,
            elector,
            rounds: TtlCache::new(Duration::from_secs(config.round_ttl_secs)),
            events,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Validator registry
    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// Leader elector
    pub fn elector(&self) -> &Arc<LeaderElector> {
        &self.elector
    }

    /// Subscribe to coordinator events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Load the validator set from the chain
    pub async fn load_validators(&self, chain: &dyn ChainClient) -> Result<usize> {
        self.registry.load(chain).await
    }

    /// Most recently elected leader
    pub fn current_leader(&self) -> Option<Address> {
        self.elector.current_leader()
    }

    /// Performance score of one validator
    pub fn validator_performance(&self, address: &str) -> Result<f64> {
        self.registry.validator_performance(address)
    }

    /// Performance of every validator
    pub fn all_validator_performances(&self) -> Vec<(Address, f64)> {
        self.registry.all_validator_performances()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ROUNDS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a round for `request` with every known validator as participant
    pub fn create_round(&self, request: DataRequest) -> Result<RoundId> {
        let leader = self.elector.current_leader().ok_or(Error::NoLeader)?;
        let participants = self.registry.addresses();
        let request_id = request.request_id;

        let round = ConsensusRound::new(request, leader.clone(), participants);
        let round_id = round.id;
        let participant_count = round.participants.len();
        self.rounds.insert(round_id, round);

        info!(
            round_id = %round_id,
            request_id,
            leader = %leader,
            participants = participant_count,
            "Consensus round created"
        );
        self.events.publish(CoordinatorEvent::RoundCreated {
            round_id,
            request_id,
            leader,
        });

        Ok(round_id)
    }

    /// Record a validator's value; finalizes when every participant submitted
    pub fn submit(
        &self,
        round_id: &RoundId,
        validator: &str,
        value: FeedValue,
    ) -> Result<SubmitOutcome> {
        let step = self
            .rounds
            .update(round_id, |round| -> Result<_> {
                round.record(validator, value)?;
                if round.is_complete() {
                    let (value, outcomes) = round.finalize()?;
                    Ok(Step::Finalized {
                        request_id: round.request.request_id,
                        value,
                        outcomes,
                    })
                } else {
                    Ok(Step::Recorded(SubmitOutcome::Recorded {
                        submissions: round.submission_count(),
                        participants: round.participants.len(),
                    }))
                }
            })
            .ok_or_else(|| Error::InvalidRound(round_id.to_string()))??;

        if let Err(e) = self.registry.mark_active(validator) {
            debug!(validator = %validator, error = %e, "Submitter missing from registry");
        }

        match step {
            Step::Recorded(outcome) => {
                debug!(round_id = %round_id, validator = %validator, "Submission recorded");
                Ok(outcome)
            }
            Step::Finalized {
                request_id,
                value,
                outcomes,
            } => {
                self.conclude(*round_id, request_id, &value, &outcomes);
                Ok(SubmitOutcome::Finalized(value))
            }
        }
    }

    /// Finalize a round with the submissions collected so far
    pub fn finalize(&self, round_id: &RoundId) -> Result<FeedValue> {
        let (request_id, value, outcomes) = self
            .rounds
            .update(round_id, |round| {
                round
                    .finalize()
                    .map(|(value, outcomes)| (round.request.request_id, value, outcomes))
            })
            .ok_or_else(|| Error::InvalidRound(round_id.to_string()))??;

        self.conclude(*round_id, request_id, &value, &outcomes);
        Ok(value)
    }

    fn conclude(
        &self,
        round_id: RoundId,
        request_id: u64,
        value: &FeedValue,
        outcomes: &[SubmissionOutcome],
    ) {
        self.registry.apply_outcomes(outcomes);

        info!(
            round_id = %round_id,
            request_id,
            value = %value,
            submissions = outcomes.len(),
            "Consensus reached"
        );
        self.events.publish(CoordinatorEvent::ConsensusReached {
            round_id,
            request_id,
            value: value.clone(),
        });
    }

    /// Snapshot of a live round
    pub fn round(&self, round_id: &RoundId) -> Option<ConsensusRound> {
        self.rounds.get(round_id)
    }

    /// Number of rounds in the store, finalized ones included
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Drop expired rounds
    pub fn purge_expired_rounds(&self) -> usize {
        self.rounds.purge_expired()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BACKGROUND TASKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start periodic leader election and performance refresh
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Coordinator tasks already running");
            return Ok(());
        }

        let elector = self.elector.clone();
        let election = PeriodicTask::spawn(
            "leader-election",
            Duration::from_secs(self.config.election_interval_secs),
            move || {
                let elector = elector.clone();
                async move {
                    elector.elect();
                }
            },
        )?;

        let registry = self.registry.clone();
        let performance = PeriodicTask::spawn(
            "performance-refresh",
            Duration::from_secs(self.config.performance_interval_secs),
            move || {
                let registry = registry.clone();
                async move {
                    registry.refresh_performance();
                }
            },
        )?;

        tasks.push(election);
        tasks.push(performance);

        info!(
            election_secs = self.config.election_interval_secs,
            performance_secs = self.config.performance_interval_secs,
            "Coordinator tasks started"
        );
        Ok(())
    }

    /// Stop background tasks
    pub async fn stop(&self) {
        let tasks: Vec<PeriodicTask> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.stop().await;
        }
    }
}

enum Step {
    Recorded(SubmitOutcome),
    Finalized {
        request_id: u64,
        value: FeedValue,
        outcomes: Vec<SubmissionOutcome>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::validator::Validator;
    use chrono::Utc;

    fn coordinator(validators: &[(&str, u64)]) -> ConsensusCoordinator {
        let coordinator = ConsensusCoordinator::new(ConsensusConfig::default());
        let now = Utc::now();
        for (addr, stake) in validators {
            coordinator.registry().upsert(Validator::new(*addr, *stake, now));
        }
        coordinator
    }

    fn request(id: u64) -> DataRequest {
        DataRequest {
            request_id: id,
            source: "cryptoPrice".into(),
            payload: FeedValue::from(2000.0),
        }
    }

    #[test]
    fn test_create_round_requires_leader() {
        let c = coordinator(&[("a", 1)]);
        assert!(matches!(c.create_round(request(1)), Err(Error::NoLeader)));

        c.elector().elect();
        let id = c.create_round(request(1)).unwrap();
        let round = c.round(&id).unwrap();
        assert_eq!(round.participants, vec!["a"]);
        assert_eq!(round.leader, "a");
        assert!(round.is_active());
    }

    #[test]
    fn test_round_ids_unique() {
        let c = coordinator(&[("a", 1)]);
        c.elector().elect();
        let a = c.create_round(request(1)).unwrap();
        let b = c.create_round(request(1)).unwrap();
        assert_ne!(a, b);
        assert_eq!(c.round_count(), 2);
    }

    #[test]
    fn test_last_submission_finalizes() {
        let c = coordinator(&[("a", 1), ("b", 1), ("c", 1)]);
        c.elector().elect();
        let id = c.create_round(request(7)).unwrap();

        assert_eq!(
            c.submit(&id, "a", 5.0.into()).unwrap(),
            SubmitOutcome::Recorded {
                submissions: 1,
                participants: 3
            }
        );
        c.submit(&id, "b", 5.0.into()).unwrap();
        assert_eq!(
            c.submit(&id, "c", 7.0.into()).unwrap(),
            SubmitOutcome::Finalized(5.0.into())
        );

        let round = c.round(&id).unwrap();
        assert!(!round.is_active());
        assert_eq!(round.consensus_value, Some(5.0.into()));

        let a = c.registry().get("a").unwrap();
        let cv = c.registry().get("c").unwrap();
        assert_eq!((a.successful_submissions, a.total_submissions), (1, 1));
        assert_eq!((cv.successful_submissions, cv.total_submissions), (0, 1));

        assert!(matches!(
            c.submit(&id, "a", 5.0.into()),
            Err(Error::InvalidRound(_))
        ));
    }

    #[test]
    fn test_explicit_finalize_once() {
        let c = coordinator(&[("a", 1), ("b", 1), ("c", 1)]);
        c.elector().elect();
        let id = c.create_round(request(1)).unwrap();
        c.submit(&id, "a", 5.0.into()).unwrap();
        c.submit(&id, "b", 6.0.into()).unwrap();

        assert_eq!(c.finalize(&id).unwrap(), FeedValue::from(5.0));
        assert!(matches!(c.finalize(&id), Err(Error::InvalidRound(_))));

        // non-submitter untouched
        assert_eq!(c.registry().get("c").unwrap().total_submissions, 0);
    }

    #[test]
    fn test_unknown_round_and_outsider() {
        let c = coordinator(&[("a", 1), ("b", 1)]);
        c.elector().elect();
        assert!(matches!(
            c.submit(&RoundId::new(), "a", 1.0.into()),
            Err(Error::InvalidRound(_))
        ));
        assert!(matches!(c.finalize(&RoundId::new()), Err(Error::InvalidRound(_))));

        let id = c.create_round(request(1)).unwrap();
        assert!(matches!(
            c.submit(&id, "z", 1.0.into()),
            Err(Error::NotParticipant { .. })
        ));
        assert_eq!(c.round(&id).unwrap().submission_count(), 0);
    }

    #[test]
    fn test_submission_refreshes_activity() {
        let c = coordinator(&[("a", 1), ("b", 1)]);
        c.registry()
            .touch("b", Utc::now() - chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(c.elector().elect().as_deref(), Some("a"));

        let id = c.create_round(request(1)).unwrap();
        c.submit(&id, "b", 1.0.into()).unwrap();
        assert_eq!(c.registry().active().len(), 2);
    }

    #[tokio::test]
    async fn test_consensus_event_published() {
        let c = coordinator(&[("a", 1)]);
        c.elector().elect();
        let mut rx = c.subscribe();

        let id = c.create_round(request(3)).unwrap();
        c.submit(&id, "a", 9.0.into()).unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            CoordinatorEvent::RoundCreated { request_id: 3, .. }
        ));
        match rx.recv().await.unwrap() {
            CoordinatorEvent::ConsensusReached {
                round_id,
                request_id,
                value,
            } => {
                assert_eq!(round_id, id);
                assert_eq!(request_id, 3);
                assert_eq!(value, FeedValue::from(9.0));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_submitters_finalize_once() {
        let participants: Vec<String> = (0..16).map(|i| format!("v{}", i)).collect();
        let c = Arc::new(ConsensusCoordinator::new(ConsensusConfig::default()));
        let now = Utc::now();
        for p in &participants {
            c.registry().upsert(Validator::new(p.clone(), 1, now));
        }
        c.elector().elect();
        let id = c.create_round(request(1)).unwrap();

        let handles: Vec<_> = participants
            .into_iter()
            .map(|p| {
                let c = c.clone();
                std::thread::spawn(move || c.submit(&id, &p, 1.0.into()).unwrap())
            })
            .collect();

        let finalized = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, SubmitOutcome::Finalized(_)))
            .count();
        assert_eq!(finalized, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_election() {
        let c = Arc::new(coordinator(&[("a", 1)]));
        c.start().unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(c.current_leader().as_deref(), Some("a"));
        c.stop().await;
    }
}
